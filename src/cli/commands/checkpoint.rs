//! Checkpoint inspection commands.

use console::style;

use crate::config::Settings;
use crate::models::SyncPhase;
use crate::sync::{CheckpointStore, ScrapeRunLedger};

use super::super::helpers::open_mirror;

async fn store(settings: &Settings) -> anyhow::Result<CheckpointStore> {
    let db = open_mirror(settings).await?;
    let ledger = ScrapeRunLedger::new(
        db.scrape_runs(),
        chrono::Duration::minutes(settings.stale_after_minutes),
    );
    Ok(CheckpointStore::new(db.checkpoints(), ledger))
}

pub async fn cmd_checkpoint_show(settings: &Settings) -> anyhow::Result<()> {
    let Some(checkpoint) = store(settings).await?.load().await? else {
        println!("{} No checkpoint; the next run starts a new window", style("✓").green());
        return Ok(());
    };

    println!("{:<20} {}", "Run:", checkpoint.run_id);
    println!("{:<20} {}", "Phase:", checkpoint.phase);
    println!(
        "{:<20} {} → {}",
        "Window:",
        checkpoint.window_start.to_rfc3339(),
        checkpoint.window_end.to_rfc3339()
    );
    println!("{:<20} {}", "Pages in change set:", checkpoint.change_set.len());
    println!("{:<20} {}", "Failed pages:", checkpoint.failed_pages.len());
    for phase in SyncPhase::ALL {
        if let Some(cursor) = checkpoint.cursor(phase) {
            println!("  {:<18} {}", format!("{}:", phase), cursor);
        }
    }
    println!(
        "{:<20} {}",
        "Updated:",
        checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

pub async fn cmd_checkpoint_clear(settings: &Settings) -> anyhow::Result<()> {
    if store(settings).await?.clear().await? {
        println!("{} Checkpoint cleared", style("✓").green());
    } else {
        println!("{} No checkpoint to clear", style("!").yellow());
    }
    Ok(())
}
