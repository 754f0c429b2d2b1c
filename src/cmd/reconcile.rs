//! Single-repository command: `pipeline-factory reconcile`.

use anyhow::{Context, Result};
use pipeline_factory::config::FactoryConfig;
use pipeline_factory::factory::models::DiscoveryJob;
use pipeline_factory::factory::server::build_state;

pub async fn cmd_reconcile(config: &FactoryConfig, owner: &str, repository: &str, dry_run: bool) -> Result<()> {
    let state = build_state(config);
    let job = DiscoveryJob {
        name: repository.to_string(),
        owner: owner.to_string(),
    };

    if dry_run {
        let plan = state.worker.plan_job(&job).await?;
        println!("{}", serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?);
        return Ok(());
    }

    let report = state.worker.process_job(&job).await?;
    println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);
    if report.is_partial_failure() {
        anyhow::bail!(
            "{} of the branch actions for {}/{} failed",
            report.errors.len(),
            owner,
            repository
        );
    }
    Ok(())
}
