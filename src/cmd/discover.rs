//! One-shot discovery command: `pipeline-factory discover`.

use anyhow::{Context, Result};
use pipeline_factory::config::FactoryConfig;
use pipeline_factory::factory::server::build_state;
use serde::Serialize;

use pipeline_factory::factory::scheduler::ScheduleReport;
use pipeline_factory::factory::worker::BatchOutcome;

#[derive(Serialize)]
struct DiscoverySummary {
    schedule: ScheduleReport,
    batches: Vec<BatchOutcome>,
}

/// Enqueue every subscribed repository, then drain the queue, including
/// redeliveries, and print the outcome as JSON.
pub async fn cmd_discover(config: &FactoryConfig) -> Result<()> {
    let state = build_state(config);

    let schedule = state.scheduler.run(&state.organization).await?;
    let batches = state
        .worker
        .drain(&state.queue, config.discovery.batch_size)
        .await;

    let failed: usize = batches.iter().map(|b| b.failed_message_ids.len()).sum();
    let summary = DiscoverySummary { schedule, batches };
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize discovery summary")?
    );

    if failed > 0 || !summary.schedule.failures.is_empty() {
        anyhow::bail!(
            "Discovery finished with {} failed deliveries and {} enqueue failures",
            failed,
            summary.schedule.failures.len()
        );
    }
    Ok(())
}
