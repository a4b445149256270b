use crate::config::types::{
    Config, DedupConfig, FetchConfig, LedgerConfig, ResumeStrategy, SchedulerConfig, TargetConfig,
};
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Hard ceiling on worker count regardless of configuration
const MAX_WORKERS_LIMIT: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_ledger_config(&config.ledger)?;
    validate_dedup_config(&config.dedup)?;
    validate_fetch_config(&config.fetch)?;
    validate_targets(&config.targets)?;
    Ok(())
}

/// Validates scheduler configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.min_workers < 1 {
        return Err(ConfigError::Validation(format!(
            "min_workers must be >= 1, got {}",
            config.min_workers
        )));
    }

    if config.max_workers > MAX_WORKERS_LIMIT {
        return Err(ConfigError::Validation(format!(
            "max_workers must be <= {}, got {}",
            MAX_WORKERS_LIMIT, config.max_workers
        )));
    }

    if !(config.min_workers <= config.initial_workers
        && config.initial_workers <= config.max_workers)
    {
        return Err(ConfigError::Validation(format!(
            "worker bounds must satisfy min <= initial <= max, got {} <= {} <= {}",
            config.min_workers, config.initial_workers, config.max_workers
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity must be >= 1".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.adjust_interval < 1 {
        return Err(ConfigError::Validation(
            "adjust_interval must be >= 1".to_string(),
        ));
    }

    if config.window_size < config.adjust_interval {
        return Err(ConfigError::Validation(format!(
            "window_size ({}) must be >= adjust_interval ({})",
            config.window_size, config.adjust_interval
        )));
    }

    let low = config.error_low_watermark;
    let high = config.error_high_watermark;
    if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
        return Err(ConfigError::Validation(format!(
            "error watermarks must satisfy 0 <= low < high <= 1, got low={} high={}",
            low, high
        )));
    }

    Ok(())
}

/// Validates ledger configuration
fn validate_ledger_config(config: &LedgerConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.save_attempts < 1 {
        return Err(ConfigError::Validation(
            "save_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates dedup configuration
fn validate_dedup_config(config: &DedupConfig) -> Result<(), ConfigError> {
    if config.near_duplicate_threshold > 64 {
        return Err(ConfigError::Validation(format!(
            "near_duplicate_threshold must be <= 64, got {}",
            config.near_duplicate_threshold
        )));
    }

    if config.artifact_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "artifact_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates fetch configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.min_bytes > config.max_bytes {
        return Err(ConfigError::Validation(format!(
            "min_bytes ({}) must be <= max_bytes ({})",
            config.min_bytes, config.max_bytes
        )));
    }

    if config.allowed_formats.is_empty() {
        return Err(ConfigError::Validation(
            "allowed_formats must list at least one format".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawl target entries
fn validate_targets(targets: &[TargetConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for target in targets {
        validate_target(target)?;

        if !seen.insert((target.site.as_str(), target.board.as_str())) {
            return Err(ConfigError::Validation(format!(
                "Duplicate target '{}/{}'",
                target.site, target.board
            )));
        }
    }

    Ok(())
}

/// Validates a single crawl target
fn validate_target(target: &TargetConfig) -> Result<(), ConfigError> {
    if target.site.trim().is_empty() {
        return Err(ConfigError::Validation(
            "target site cannot be empty".to_string(),
        ));
    }

    if target.board.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "target '{}' has an empty board name",
            target.site
        )));
    }

    if !target.list_url.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "list_url '{}' must contain a {{page}} placeholder",
            target.list_url
        )));
    }

    let url = Url::parse(&target.page_url(target.start_page)).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid list_url '{}': {}", target.list_url, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "list_url '{}' must use http or https",
            target.list_url
        )));
    }

    Selector::parse(&target.image_selector).map_err(|e| {
        ConfigError::InvalidSelector(format!("'{}': {:?}", target.image_selector, e))
    })?;

    if target.start_page < 1 {
        return Err(ConfigError::Validation(format!(
            "target '{}/{}' start_page must be >= 1",
            target.site, target.board
        )));
    }

    if let Some(end) = target.end_page {
        if end < target.start_page {
            return Err(ConfigError::Validation(format!(
                "target '{}/{}' end_page ({}) is before start_page ({})",
                target.site, target.board, end, target.start_page
            )));
        }
    }

    match (&target.resume_strategy, &target.item_id_pattern) {
        (ResumeStrategy::IdRange, None) => {
            return Err(ConfigError::Validation(format!(
                "target '{}/{}' uses id-range resume but has no item_id_pattern",
                target.site, target.board
            )));
        }
        (_, Some(pattern)) => {
            let regex = Regex::new(pattern)
                .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))?;
            if regex.captures_len() < 2 {
                return Err(ConfigError::InvalidPattern(format!(
                    "'{}' must contain a capture group for the item id",
                    pattern
                )));
            }
        }
        (ResumeStrategy::Page, None) => {}
    }

    Ok(())
}
