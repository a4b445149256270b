//! Harvest statistics reporting
//!
//! Formats the counters of a finished harvest: per-target scheduler stats and
//! the dedup engine's activity.

use crate::crawler::{HarvestSummary, RunStats, TargetOutcome};
use crate::dedup::DedupStats;
use std::fmt::Write;

/// Renders the scheduler counters of one target
pub fn render_run_stats(stats: &RunStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  Tasks: {}", stats.tasks);
    let _ = writeln!(out, "  Attempts: {}", stats.attempted);
    let _ = writeln!(out, "  Stored: {}", stats.succeeded);
    let _ = writeln!(out, "  Duplicates: {}", stats.duplicates);
    let _ = writeln!(
        out,
        "  Failed: {} ({} retried transient failures)",
        stats.permanent_failed, stats.transient_failed
    );
    if stats.discarded > 0 {
        let _ = writeln!(out, "  Discarded: {}", stats.discarded);
    }
    let _ = writeln!(
        out,
        "  Workers: {} at end, {} adjustments",
        stats.final_workers,
        stats.adjustments.len()
    );
    let _ = writeln!(out, "  Checkpoints saved: {}", stats.checkpoints_saved);
    out
}

/// Renders dedup counters
pub fn render_dedup_stats(stats: &DedupStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Deduplication:");
    let _ = writeln!(out, "  URLs checked: {}", stats.urls_checked);
    let _ = writeln!(out, "  Artifacts checked: {}", stats.artifacts_checked);
    let _ = writeln!(out, "  URL duplicates: {}", stats.url_duplicates);
    let _ = writeln!(out, "  Content duplicates: {}", stats.content_duplicates);
    let _ = writeln!(out, "  Near duplicates: {}", stats.near_duplicates);
    let _ = writeln!(out, "  Unique: {}", stats.unique);
    let _ = writeln!(out, "  Duplicate rate: {:.1}%", stats.duplicate_rate() * 100.0);
    out
}

/// Prints the summary of a harvest to stdout
pub fn print_summary(summary: &HarvestSummary) {
    println!("=== Harvest Run {} ===\n", summary.run_id);

    for report in &summary.targets {
        let outcome = match &report.outcome {
            TargetOutcome::Completed => "completed".to_string(),
            TargetOutcome::Skipped => "skipped (already completed)".to_string(),
            TargetOutcome::Cancelled => "interrupted".to_string(),
            TargetOutcome::Failed(message) => format!("error: {}", message),
        };
        println!("{} from page {}: {}", report.key, report.start_page, outcome);

        if report.outcome != TargetOutcome::Skipped {
            print!("{}", render_run_stats(&report.stats));
        }
        println!();
    }

    print!("{}", render_dedup_stats(&summary.dedup));

    if summary.cancelled {
        println!("\nInterrupted; run again to resume.");
    }
}
