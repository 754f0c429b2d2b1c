//! Settings validation command: `pipeline-factory check-settings`.

use std::path::Path;

use anyhow::{Context, Result};
use pipeline_factory::factory::models::SettingsOverrides;

pub fn cmd_check_settings(file: &Path, branches: &[String], default_branch: &str) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read settings file: {}", file.display()))?;
    let settings = SettingsOverrides::parse(&content)
        .with_context(|| format!("Malformed settings file: {}", file.display()))?;

    println!("{} is valid", file.display());
    if settings.opted_out() {
        println!("  repository deploys via GitHub Actions; no pipelines will be provisioned");
    }
    let monitored = settings.monitored_branches.as_deref().unwrap_or_default();
    println!(
        "  monitored branches: {} plus the default branch",
        if monitored.is_empty() { "none".to_string() } else { monitored.join(", ") }
    );
    println!(
        "  notification rules: {}",
        settings.notifications.as_ref().map_or(0, Vec::len)
    );

    for branch in branches {
        let verdict = if settings.monitors_branch(branch, default_branch) {
            "monitored"
        } else {
            "not monitored"
        };
        println!("  {}: {}", branch, verdict);
    }
    Ok(())
}
