//! Baseline registration.

use chrono::{DateTime, Utc};
use console::style;

use crate::config::Settings;
use crate::sync::ScrapeRunLedger;

use super::super::helpers::open_mirror;

/// Record a successful baseline entry so incremental runs have a window start.
pub async fn cmd_baseline(settings: &Settings, at: Option<&str>) -> anyhow::Result<()> {
    let at = match at {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| anyhow::anyhow!("Invalid --at timestamp {:?}: {}", s, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let db = open_mirror(settings).await?;
    let ledger = ScrapeRunLedger::new(
        db.scrape_runs(),
        chrono::Duration::minutes(settings.stale_after_minutes),
    );
    let run = ledger.record_baseline(at).await?;

    println!(
        "{} Recorded baseline {} at {}",
        style("✓").green(),
        run.id,
        at.to_rfc3339()
    );
    Ok(())
}
