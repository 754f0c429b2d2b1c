//! Queue consumer: one reconciliation pass per discovery job.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;

use super::coordinator::{PipelineCoordinator, ReconcilePlan, ReconcileReport};
use super::explorer::{RepositoryExplorer, SubscriptionFilter};
use super::github::SourceControlConnector;
use super::models::DiscoveryJob;
use super::scheduler::{ChannelWorkQueue, QueuedMessage};
use super::stacks::StackRegistry;
use crate::errors::FactoryResult;

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub reports: Vec<ReconcileReport>,
    /// Messages to redeliver.
    pub failed_message_ids: Vec<String>,
}

pub struct DiscoveryWorker {
    connector: Arc<dyn SourceControlConnector>,
    stacks: Arc<dyn StackRegistry>,
    filter: SubscriptionFilter,
    coordinator: PipelineCoordinator,
}

impl DiscoveryWorker {
    pub fn new(
        connector: Arc<dyn SourceControlConnector>,
        stacks: Arc<dyn StackRegistry>,
        filter: SubscriptionFilter,
        coordinator: PipelineCoordinator,
    ) -> Self {
        Self {
            connector,
            stacks,
            filter,
            coordinator,
        }
    }

    async fn explorer(&self, owner: &str) -> FactoryResult<RepositoryExplorer> {
        RepositoryExplorer::connect(self.connector.as_ref(), owner, self.stacks.clone(), self.filter.clone()).await
    }

    /// Reconcile one repository against the live stack set.
    #[tracing::instrument(skip(self), fields(repository = %job.identity()))]
    pub async fn process_job(&self, job: &DiscoveryJob) -> FactoryResult<ReconcileReport> {
        let config = self
            .explorer(&job.owner)
            .await?
            .build_configuration(&job.identity())
            .await?;
        Ok(self.coordinator.reconcile(&config).await)
    }

    /// The actions `process_job` would take, without taking them.
    pub async fn plan_job(&self, job: &DiscoveryJob) -> FactoryResult<ReconcilePlan> {
        let config = self
            .explorer(&job.owner)
            .await?
            .build_configuration(&job.identity())
            .await?;
        Ok(self.coordinator.plan(&config))
    }

    async fn process_message(&self, message: &QueuedMessage) -> FactoryResult<ReconcileReport> {
        let job = message.job()?;
        self.process_job(&job).await
    }

    /// Process messages independently. A message is failed when it cannot be
    /// decoded, when its pass aborts, or when any branch action failed.
    pub async fn process_batch(&self, messages: &[QueuedMessage]) -> BatchOutcome {
        let results = join_all(messages.iter().map(|m| async move { (m, self.process_message(m).await) })).await;

        let mut outcome = BatchOutcome::default();
        for (message, result) in results {
            match result {
                Ok(report) => {
                    if report.is_partial_failure() {
                        tracing::warn!(
                            message_id = %message.message_id,
                            repository = %report.repository,
                            errors = report.errors.len(),
                            "reconciliation partially failed"
                        );
                        outcome.failed_message_ids.push(message.message_id.clone());
                    }
                    outcome.reports.push(report);
                }
                Err(e) if e.is_data_error() => {
                    tracing::error!(message_id = %message.message_id, error = %e, "repository data is invalid");
                    outcome.failed_message_ids.push(message.message_id.clone());
                }
                Err(e) => {
                    tracing::error!(message_id = %message.message_id, error = %e, "discovery job failed");
                    outcome.failed_message_ids.push(message.message_id.clone());
                }
            }
        }
        outcome
    }

    /// Hand failed messages of `batch` back to `queue`.
    fn redeliver(queue: &ChannelWorkQueue, batch: Vec<QueuedMessage>, outcome: &BatchOutcome) {
        for message in batch {
            if outcome.failed_message_ids.contains(&message.message_id)
                && let Err(e) = queue.requeue(message)
            {
                tracing::error!(error = %e, "failed to requeue message");
            }
        }
    }

    /// Process everything currently queued, including redeliveries, and stop
    /// once the queue is empty.
    pub async fn drain(&self, queue: &ChannelWorkQueue, batch_size: usize) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let batch = queue.try_receive_batch(batch_size).await;
            if batch.is_empty() {
                return outcomes;
            }
            let outcome = self.process_batch(&batch).await;
            Self::redeliver(queue, batch, &outcome);
            outcomes.push(outcome);
        }
    }

    /// Consume `queue` until `shutdown` flips.
    pub async fn run(&self, queue: Arc<ChannelWorkQueue>, batch_size: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            let batch = tokio::select! {
                batch = queue.receive_batch(batch_size) => batch,
                _ = shutdown.changed() => {
                    tracing::info!("discovery worker stopping");
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }
            let outcome = self.process_batch(&batch).await;
            Self::redeliver(&queue, batch, &outcome);
        }
    }
}
