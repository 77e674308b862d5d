//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::repository::migrations;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let applied = migrations::run_migrations(&settings.database_url()).await?;
    for name in &applied {
        println!("  {} Applied migration: {}", style("✓").green(), name);
    }

    if settings.api_url.is_none() {
        println!(
            "{} No origin configured; set {} or api_url in wikisync.toml",
            style("!").yellow(),
            crate::config::API_URL_ENV
        );
    }

    println!(
        "{} Initialized wikisync in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
