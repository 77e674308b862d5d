//! Run ledger listing.

use console::style;

use crate::config::Settings;
use crate::models::RunMode;

use super::super::helpers::{open_mirror, status_label};

/// List the most recent runs, newest first.
pub async fn cmd_runs(settings: &Settings, limit: i64, json: bool) -> anyhow::Result<()> {
    let db = open_mirror(settings).await?;
    let runs = db.scrape_runs().recent(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs recorded", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<36}  {:<11}  {:<11}  {:<16}  {:>6}  {:>6}  {:>6}",
        "Run", "Mode", "Status", "Started", "Pages", "Revs", "Failed"
    );
    println!("{}", "-".repeat(106));
    for run in runs {
        let counts = &run.counts;
        let pages =
            counts.new_pages + counts.modified_pages + counts.deleted_pages + counts.moved_pages;
        let mode = match run.mode {
            RunMode::Baseline => style(run.mode.as_str()).dim().to_string(),
            RunMode::Incremental => run.mode.as_str().to_string(),
        };
        println!(
            "{:<36}  {:<11}  {:<11}  {:<16}  {:>6}  {:>6}  {:>6}",
            run.id,
            mode,
            status_label(run.status),
            run.started_at.format("%Y-%m-%d %H:%M"),
            pages,
            counts.revisions_added,
            counts.failed_entities
        );
        if let Some(summary) = run.error_summary {
            println!("  {} {}", style("└").dim(), summary);
        }
    }

    Ok(())
}
