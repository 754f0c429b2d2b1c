//! Handlers for branch created/deleted webhooks.
//!
//! Business rejections (branch not monitored, no matching stack, deletion
//! disabled) are successful results with an explanatory message. Only
//! infrastructure failures are errors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::github::SourceControlConnector;
use super::models::{PipelineOverrides, PipelineRequest};
use super::settings::SettingsResolver;
use super::stacks::StackRegistry;
use crate::errors::FactoryResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEvent {
    pub owner: String,
    pub repository: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOperationResult {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
}

impl PipelineOperationResult {
    fn rejected(message: String) -> Self {
        Self {
            message,
            stack_id: None,
        }
    }
}

pub struct BranchEventHandler {
    connector: Arc<dyn SourceControlConnector>,
    stacks: Arc<dyn StackRegistry>,
    allow_deletion: bool,
    artifacts_bucket: Option<String>,
}

impl BranchEventHandler {
    pub fn new(connector: Arc<dyn SourceControlConnector>, stacks: Arc<dyn StackRegistry>) -> Self {
        Self {
            connector,
            stacks,
            allow_deletion: true,
            artifacts_bucket: None,
        }
    }

    pub fn with_deletion(mut self, allow: bool) -> Self {
        self.allow_deletion = allow;
        self
    }

    pub fn with_artifacts_bucket(mut self, bucket: Option<String>) -> Self {
        self.artifacts_bucket = bucket;
        self
    }

    #[tracing::instrument(skip(self), fields(owner = %event.owner, repository = %event.repository, branch = %event.branch))]
    pub async fn branch_created(&self, event: &BranchEvent) -> FactoryResult<PipelineOperationResult> {
        let source = self.connector.connect(&event.owner).await?;
        let details = source.get_repository(&event.owner, &event.repository).await?;
        let resolver = SettingsResolver::new(source);

        let repository_settings = resolver
            .resolve(&event.owner, &event.repository, &details.default_branch)
            .await?;
        if repository_settings.opted_out() {
            return Ok(PipelineOperationResult::rejected(format!(
                "Repository {}/{} deploys via GitHub Actions",
                event.owner, event.repository
            )));
        }
        if !repository_settings.monitors_branch(&event.branch, &details.default_branch) {
            tracing::info!("branch not configured for monitoring");
            return Ok(PipelineOperationResult::rejected(format!(
                "Branch {} is not configured for monitoring",
                event.branch
            )));
        }

        let branch_settings = resolver
            .fetch(&event.owner, &event.repository, &event.branch)
            .await?
            .unwrap_or(repository_settings);

        let stack = self
            .stacks
            .create_pipeline(&PipelineRequest {
                owner: event.owner.clone(),
                repository: event.repository.clone(),
                branch: event.branch.clone(),
                overrides: PipelineOverrides::from_settings(&branch_settings, self.artifacts_bucket.as_deref()),
            })
            .await?;

        tracing::info!(stack = %stack.stack_name, "pipeline created");
        Ok(PipelineOperationResult {
            message: format!("Pipeline {} created for branch {}", stack.stack_name, event.branch),
            stack_id: Some(stack.stack_id),
        })
    }

    #[tracing::instrument(skip(self), fields(owner = %event.owner, repository = %event.repository, branch = %event.branch))]
    pub async fn branch_deleted(&self, event: &BranchEvent) -> FactoryResult<PipelineOperationResult> {
        if !self.allow_deletion {
            tracing::warn!("pipeline deletion disabled, stack retained");
            return Ok(PipelineOperationResult::rejected(format!(
                "Pipeline deletion is disabled; stack for branch {} retained",
                event.branch
            )));
        }

        match self
            .stacks
            .delete_pipeline(&event.owner, &event.repository, &event.branch)
            .await?
        {
            Some(stack) => Ok(PipelineOperationResult {
                message: format!("Pipeline {} deleted", stack.stack_name),
                stack_id: Some(stack.stack_name),
            }),
            None => Ok(PipelineOperationResult::rejected(format!(
                "No matching stack for branch {} of {}/{}",
                event.branch, event.owner, event.repository
            ))),
        }
    }
}
