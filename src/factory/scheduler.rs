//! Periodic discovery: enqueue one job per subscribed repository.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};

use super::explorer::{RepositoryExplorer, SubscriptionFilter};
use super::github::SourceControlConnector;
use super::models::DiscoveryJob;
use super::stacks::StackRegistry;
use crate::errors::{FactoryError, FactoryResult};

pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;

/// At-least-once queue of discovery jobs.
/// Real implementation: `ChannelWorkQueue`.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Returns the message id.
    async fn enqueue(&self, job: &DiscoveryJob) -> FactoryResult<String>;
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub message_id: String,
    pub body: String,
    #[serde(default)]
    pub receive_count: u32,
}

impl QueuedMessage {
    pub fn new(job: &DiscoveryJob) -> FactoryResult<Self> {
        let body = serde_json::to_string(job)
            .map_err(|e| FactoryError::Queue(format!("Failed to encode job: {}", e)))?;
        Ok(Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            body,
            receive_count: 0,
        })
    }

    pub fn job(&self) -> FactoryResult<DiscoveryJob> {
        serde_json::from_str(&self.body).map_err(|e| {
            FactoryError::Queue(format!("Message {} is not a discovery job: {}", self.message_id, e))
        })
    }
}

/// In-process queue on a tokio channel.
pub struct ChannelWorkQueue {
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<QueuedMessage>>,
    max_receive_count: u32,
}

impl ChannelWorkQueue {
    pub fn new(max_receive_count: u32) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            max_receive_count: max_receive_count.max(1),
        }
    }

    fn push(&self, message: QueuedMessage) -> FactoryResult<()> {
        self.sender
            .send(message)
            .map_err(|_| FactoryError::Queue("Work queue is closed".into()))
    }

    fn delivered(mut message: QueuedMessage) -> QueuedMessage {
        message.receive_count += 1;
        message
    }

    /// Wait for at least one message, then take up to `max` without waiting.
    pub async fn receive_batch(&self, max: usize) -> Vec<QueuedMessage> {
        let mut receiver = self.receiver.lock().await;
        let Some(first) = receiver.recv().await else {
            return Vec::new();
        };
        let mut batch = vec![Self::delivered(first)];
        while batch.len() < max {
            match receiver.try_recv() {
                Ok(message) => batch.push(Self::delivered(message)),
                Err(_) => break,
            }
        }
        batch
    }

    /// Take up to `max` messages that are already queued.
    pub async fn try_receive_batch(&self, max: usize) -> Vec<QueuedMessage> {
        let mut receiver = self.receiver.lock().await;
        let mut batch = Vec::new();
        while batch.len() < max {
            match receiver.try_recv() {
                Ok(message) => batch.push(Self::delivered(message)),
                Err(_) => break,
            }
        }
        batch
    }

    /// Redeliver a failed message. Returns `false` when the message has
    /// reached the receive limit and was dead-lettered instead.
    pub fn requeue(&self, message: QueuedMessage) -> FactoryResult<bool> {
        if message.receive_count >= self.max_receive_count {
            tracing::error!(
                message_id = %message.message_id,
                receive_count = message.receive_count,
                body = %message.body,
                "message exceeded receive limit, dropping"
            );
            return Ok(false);
        }
        tracing::debug!(message_id = %message.message_id, "requeueing failed message");
        self.push(message)?;
        Ok(true)
    }
}

#[async_trait]
impl WorkQueue for ChannelWorkQueue {
    async fn enqueue(&self, job: &DiscoveryJob) -> FactoryResult<String> {
        let message = QueuedMessage::new(job)?;
        let id = message.message_id.clone();
        self.push(message)?;
        Ok(id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueFailure {
    pub job: DiscoveryJob,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleReport {
    pub started_at: DateTime<Utc>,
    pub enqueued: Vec<(DiscoveryJob, String)>,
    pub failures: Vec<EnqueueFailure>,
}

pub struct DiscoveryScheduler {
    connector: Arc<dyn SourceControlConnector>,
    stacks: Arc<dyn StackRegistry>,
    filter: SubscriptionFilter,
    queue: Arc<dyn WorkQueue>,
}

impl DiscoveryScheduler {
    pub fn new(
        connector: Arc<dyn SourceControlConnector>,
        stacks: Arc<dyn StackRegistry>,
        filter: SubscriptionFilter,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            connector,
            stacks,
            filter,
            queue,
        }
    }

    /// Enqueue one job per subscribed repository. Listing failures abort the
    /// run; individual enqueue failures are collected.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, organization: &str) -> FactoryResult<ScheduleReport> {
        let explorer = RepositoryExplorer::connect(
            self.connector.as_ref(),
            organization,
            self.stacks.clone(),
            self.filter.clone(),
        )
        .await?;
        let repositories = explorer.list_subscribed_repositories(organization).await?;

        let sends = repositories.iter().map(|summary| async move {
            let job = DiscoveryJob::from(summary);
            let result = self.queue.enqueue(&job).await;
            (job, result)
        });

        let mut report = ScheduleReport {
            started_at: Utc::now(),
            ..Default::default()
        };
        for (job, result) in join_all(sends).await {
            match result {
                Ok(id) => report.enqueued.push((job, id)),
                Err(e) => {
                    tracing::error!(repository = %job.identity(), error = %e, "failed to enqueue discovery job");
                    report.failures.push(EnqueueFailure {
                        job,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            enqueued = report.enqueued.len(),
            failed = report.failures.len(),
            "discovery run complete"
        );
        Ok(report)
    }

    /// Run immediately and then every `interval` until `shutdown` flips.
    pub async fn run_every(&self, interval: Duration, organization: &str, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run(organization).await {
                        tracing::error!(organization, error = %e, "discovery run failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("discovery scheduler stopping");
                    return;
                }
            }
        }
    }
}
