//! Incremental sync command.

use std::sync::Arc;

use console::style;
use tokio::sync::{mpsc, watch};

use crate::config::Settings;
use crate::models::RunStatus;
use crate::sync::{IncrementalStats, SyncError, SyncOrchestrator};

use super::super::helpers::{open_mirror, spawn_progress, status_label};

/// Run one incremental pass against the configured origin.
pub async fn cmd_sync(
    settings: &Settings,
    fresh: bool,
    workers: Option<usize>,
    no_files: bool,
    json: bool,
) -> anyhow::Result<()> {
    let db = open_mirror(settings).await?;
    settings.ensure_directories()?;
    let origin = Arc::new(settings.origin_client()?);

    let mut options = settings.sync_options();
    options.fresh = fresh;
    if let Some(workers) = workers {
        options.workers = workers.max(1);
    }
    if no_files {
        options.sync_files = false;
    }

    // First Ctrl+C cancels cooperatively after the current entity.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} Stopping after the current entity; progress is checkpointed",
                style("!").yellow()
            );
            let _ = cancel_tx.send(true);
        }
    });

    let (event_tx, event_rx) = mpsc::channel(100);
    let progress = spawn_progress(event_rx, json);

    let orchestrator = SyncOrchestrator::new(&db, origin, settings.file_store(), options)
        .with_cancel(cancel_rx)
        .with_events(event_tx);
    let result = orchestrator.run().await;
    drop(orchestrator);
    let _ = progress.await;

    let stats = match result {
        Ok(stats) => stats,
        Err(SyncError::FirstRunRequiresFullScrape) => {
            eprintln!(
                "{} No successful run recorded yet.",
                style("!").yellow()
            );
            eprintln!("  Take a full mirror, then register it with `wikisync baseline --at <time>`");
            anyhow::bail!(SyncError::FirstRunRequiresFullScrape);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_summary(&stats);
    }

    if stats.status == RunStatus::Interrupted {
        std::process::exit(130);
    }
    Ok(())
}

/// Labelled counters of the summary. `links_replaced` counts pages whose
/// link set was rewritten, not link rows.
fn count_rows(stats: &IncrementalStats) -> Vec<(&'static str, String)> {
    vec![
        (
            "Pages:",
            format!(
                "{} new, {} modified, {} deleted, {} moved",
                stats.new_pages, stats.modified_pages, stats.deleted_pages, stats.moved_pages
            ),
        ),
        (
            "Revisions:",
            format!(
                "{} added, {} duplicates discarded",
                stats.revisions_added, stats.duplicates_discarded
            ),
        ),
        (
            "Files:",
            format!(
                "{} downloaded, {} unchanged",
                stats.files_downloaded, stats.files_unchanged
            ),
        ),
        ("Pages relinked:", stats.links_replaced.to_string()),
    ]
}

fn print_summary(stats: &IncrementalStats) {
    println!(
        "\n{} Run {} {} in {:.1}s",
        match stats.status {
            RunStatus::Success => style("✓").green(),
            _ => style("!").yellow(),
        },
        stats.run_id,
        status_label(stats.status),
        stats.duration.as_secs_f64()
    );
    if let (Some(start), Some(end)) = (stats.window_start, stats.window_end) {
        println!(
            "  {:<20} {} → {}",
            "Window:",
            start.format("%Y-%m-%d %H:%M:%S"),
            end.format("%Y-%m-%d %H:%M:%S")
        );
    }
    for (label, value) in count_rows(stats) {
        println!("  {:<20} {}", label, value);
    }

    if !stats.failures.is_empty() {
        println!(
            "  {} {} entities failed and will be retried next run",
            style("!").yellow(),
            stats.failures.len()
        );
    }
    for violation in &stats.integrity {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            violation.kind.as_str(),
            violation.detail
        );
    }
}
