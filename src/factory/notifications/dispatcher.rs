use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use super::payload::{ExecutionEvent, PayloadBuilder, PipelineEventDetail};
use super::slack::NotificationSender;
use super::targets::NotificationTargetsResolver;
use crate::errors::FactoryResult;
use crate::factory::github::SourceControlConnector;
use crate::factory::models::NotificationTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub target: NotificationTarget,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Not a pipeline event, an uninteresting state, or an unmanaged pipeline.
    Ignored,
    NoTargets,
    Delivered {
        targets: Vec<NotificationTarget>,
        failures: Vec<DeliveryFailure>,
    },
}

/// Routes pipeline and build events to the channels the branch's settings
/// name for that state.
pub struct NotificationDispatcher {
    connector: Arc<dyn SourceControlConnector>,
    payloads: PayloadBuilder,
    sender: Arc<dyn NotificationSender>,
}

impl NotificationDispatcher {
    pub fn new(
        connector: Arc<dyn SourceControlConnector>,
        payloads: PayloadBuilder,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            connector,
            payloads,
            sender,
        }
    }

    #[tracing::instrument(skip_all, fields(detail_type = %event.detail_type))]
    pub async fn handle(&self, event: &ExecutionEvent) -> FactoryResult<DispatchOutcome> {
        let Some(detail) = PipelineEventDetail::from_event(event) else {
            tracing::debug!("event is not a pipeline execution event, ignoring");
            return Ok(DispatchOutcome::Ignored);
        };
        let Some(code) = self.payloads.source_of(&detail).await? else {
            tracing::debug!(name = %detail.name, "event does not belong to a managed branch, ignoring");
            return Ok(DispatchOutcome::Ignored);
        };

        let source = self.connector.connect(&code.owner).await?;
        let targets = NotificationTargetsResolver::new(source.clone())
            .resolve(&code.owner, &code.repository, &code.branch, detail.state)
            .await?;
        if targets.is_empty() {
            tracing::debug!(branch = %code.branch, state = %detail.state, "no notification rules match");
            return Ok(DispatchOutcome::NoTargets);
        }

        let payload = self.payloads.build(&detail, &code, source.as_ref()).await?;

        let sends = targets.iter().map(|target| {
            let payload = &payload;
            async move { (target, self.sender.send(target, payload).await) }
        });
        let failures = join_all(sends)
            .await
            .into_iter()
            .filter_map(|(target, result)| {
                result.err().map(|e| {
                    tracing::error!(channel = %target.channel_id, error = %e, "notification delivery failed");
                    DeliveryFailure {
                        target: target.clone(),
                        error: e.to_string(),
                    }
                })
            })
            .collect();

        Ok(DispatchOutcome::Delivered { targets, failures })
    }
}
