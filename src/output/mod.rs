//! Output module for harvest reports
//!
//! This module handles:
//! - Printing the summary of a finished harvest
//! - Listing stored checkpoints (`--status`)
//! - Printing the dry-run plan (`--dry-run`)

pub mod stats;

pub use stats::{print_summary, render_dedup_stats, render_run_stats};

use crate::crawler::{PlanAction, TargetPlan};
use crate::ledger::{CheckpointRecord, ERROR_MESSAGE_KEY};
use std::fmt::Write;

/// Renders one block per checkpoint record
pub fn render_checkpoints(records: &[CheckpointRecord]) -> String {
    let mut out = String::new();

    if records.is_empty() {
        let _ = writeln!(out, "No checkpoints recorded.");
        return out;
    }

    for record in records {
        let _ = writeln!(out, "{} [{}]", record.key, record.status);
        let _ = writeln!(out, "  Page: {}", record.current_page);
        if let Some(id) = &record.last_item_id {
            let _ = writeln!(out, "  Last item: {}", id);
        }
        if record.min_id.is_some() || record.max_id.is_some() {
            let _ = writeln!(
                out,
                "  Id window: {} - {}",
                record.min_id.as_deref().unwrap_or("?"),
                record.max_id.as_deref().unwrap_or("?")
            );
        }
        if let Some(message) = record.stats.get(ERROR_MESSAGE_KEY) {
            let _ = writeln!(out, "  Last error: {}", message);
        }

        let counters: Vec<String> = record
            .stats
            .iter()
            .filter(|(name, _)| name.as_str() != ERROR_MESSAGE_KEY)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        if !counters.is_empty() {
            let _ = writeln!(out, "  Stats: {}", counters.join(", "));
        }

        let _ = writeln!(
            out,
            "  Updated: {} (created {})",
            record.updated_at.to_rfc3339(),
            record.created_at.to_rfc3339()
        );
    }

    out
}

/// Prints every checkpoint to stdout
pub fn print_checkpoints(records: &[CheckpointRecord]) {
    println!("=== Checkpoints ({}) ===\n", records.len());
    print!("{}", render_checkpoints(records));
}

/// Prints what a harvest would do with each target
pub fn print_plan(plans: &[TargetPlan]) {
    println!("=== board-harvest Dry Run ===\n");

    for plan in plans {
        let action = match plan.action {
            PlanAction::Start => "start",
            PlanAction::Resume => "resume",
            PlanAction::Skip => "skip (completed)",
        };
        let end = plan
            .end_page
            .map_or_else(|| "last non-empty page".to_string(), |p| p.to_string());

        println!("{}: {}", plan.key, action);
        if plan.action != PlanAction::Skip {
            println!("  Pages: {} to {} ({:?} resume)", plan.start_page, end, plan.resume_strategy);
            println!("  First listing: {}", plan.first_url);
        }
    }

    let active = plans.iter().filter(|p| p.action != PlanAction::Skip).count();
    println!("\n✓ Configuration is valid");
    println!("✓ Would harvest {} of {} targets", active, plans.len());
}
