//! Shared helper functions for CLI commands.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::models::{RunStatus, SyncPhase};
use crate::repository::{migrations, DbContext};
use crate::sync::SyncEvent;

/// Open the mirror database, applying any pending migrations.
pub async fn open_mirror(settings: &Settings) -> anyhow::Result<DbContext> {
    if !settings.database_exists() {
        anyhow::bail!(
            "No mirror database at {}; run `wikisync init` first",
            settings.database_path().display()
        );
    }
    migrations::run_migrations(&settings.database_url()).await?;
    Ok(settings.create_db_context())
}

/// Styled status label.
pub fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Success => style("success").green().to_string(),
        RunStatus::Running => style("running").cyan().to_string(),
        RunStatus::Interrupted => style("interrupted").yellow().to_string(),
        RunStatus::Failed => style("failed").red().to_string(),
    }
}

fn phase_message(phase: SyncPhase) -> &'static str {
    match phase {
        SyncPhase::Discovering => "Reading change feed...",
        SyncPhase::Resolving => "Applying deletions and moves...",
        SyncPhase::FetchingRevisions => "Fetching revisions...",
        SyncPhase::FetchingFiles => "Downloading files...",
        SyncPhase::FetchingLinks => "Rebuilding links...",
        SyncPhase::Verifying => "Verifying integrity...",
        SyncPhase::Complete => "Done",
    }
}

/// Render orchestrator events as progress bars until the sender closes.
pub fn spawn_progress(mut events: mpsc::Receiver<SyncEvent>, quiet: bool) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;
        let mut failed = 0u64;

        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::RunOpened {
                    run_id,
                    resumed_from,
                } => {
                    if quiet {
                        continue;
                    }
                    match resumed_from {
                        Some(previous) => println!(
                            "{} Run {} resuming {}",
                            style("→").cyan(),
                            run_id,
                            previous
                        ),
                        None => println!("{} Run {}", style("→").cyan(), run_id),
                    }
                }
                SyncEvent::PhaseStarted { phase, total } => {
                    if quiet || total == 0 {
                        continue;
                    }
                    let progress = ProgressBar::new(total as u64);
                    progress.set_style(
                        ProgressStyle::default_bar()
                            .template(
                                "{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}",
                            )
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("█▓░"),
                    );
                    progress.set_message(phase_message(phase));
                    bar = Some(progress);
                }
                SyncEvent::EntityApplied { .. } => {
                    if let Some(ref progress) = bar {
                        progress.inc(1);
                    }
                }
                SyncEvent::EntityFailed {
                    phase,
                    entity,
                    error,
                } => {
                    failed += 1;
                    match bar {
                        Some(ref progress) => {
                            progress.inc(1);
                            progress.println(format!(
                                "  {} {} {}: {}",
                                style("✗").red(),
                                phase,
                                entity,
                                error
                            ));
                        }
                        None if !quiet => {
                            eprintln!("  {} {} {}: {}", style("✗").red(), phase, entity, error)
                        }
                        None => {}
                    }
                }
                SyncEvent::PhaseCompleted { .. } => {
                    if let Some(progress) = bar.take() {
                        progress.finish_and_clear();
                    }
                }
                SyncEvent::Finished { .. } => {
                    if let Some(progress) = bar.take() {
                        progress.abandon();
                    }
                }
            }
        }

        failed
    })
}
