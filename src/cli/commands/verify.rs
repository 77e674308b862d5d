//! Integrity verification command.

use console::style;

use crate::config::Settings;
use crate::sync::IntegrityVerifier;

use super::super::helpers::open_mirror;

pub async fn cmd_verify(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let db = open_mirror(settings).await?;
    let violations = IntegrityVerifier::new(db.integrity()).verify().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&violations)?);
    } else if violations.is_empty() {
        println!("{} Mirror passed all integrity checks", style("✓").green());
    } else {
        for violation in &violations {
            println!(
                "  {} {:<24} {}",
                style("✗").red(),
                violation.kind.as_str(),
                violation.detail
            );
        }
    }

    if !violations.is_empty() {
        anyhow::bail!("{} integrity violations found", violations.len());
    }
    Ok(())
}
