//! Applies a repository's pipeline diff to the stack registry.
//!
//! The coordinator is the isolation boundary for per-branch failures: every
//! create and delete runs concurrently, and a failure is recorded in the
//! report instead of aborting its siblings.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use super::build_config::RepositoryBuildConfiguration;
use super::explorer::SubscriptionFilter;
use super::models::{PipelineOverrides, PipelineRequest};
use super::stacks::StackRegistry;

/// Why a repository was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `deployViaGithubActions` is set in the settings file.
    OptedOut,
    /// The repository no longer matches the subscription filter.
    NotSubscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    Create,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedPipeline {
    pub branch: String,
    pub stack_name: String,
    pub stack_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchFailure {
    pub branch: String,
    pub action: PipelineAction,
    pub error: String,
}

/// The actions a reconciliation pass would take, without taking them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub skipped: Option<SkipReason>,
    pub create: Vec<String>,
    pub delete: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub owner: String,
    pub repository: String,
    pub skipped: Option<SkipReason>,
    pub created: Vec<CreatedPipeline>,
    pub deleted: Vec<String>,
    /// Obsolete branches kept because deletion is disabled.
    pub retained: Vec<String>,
    pub errors: Vec<BranchFailure>,
}

impl ReconcileReport {
    pub fn is_partial_failure(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.errors.is_empty()
    }
}

pub struct PipelineCoordinator {
    stacks: Arc<dyn StackRegistry>,
    filter: SubscriptionFilter,
    allow_deletion: bool,
    artifacts_bucket: Option<String>,
}

impl PipelineCoordinator {
    pub fn new(stacks: Arc<dyn StackRegistry>, filter: SubscriptionFilter) -> Self {
        Self {
            stacks,
            filter,
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

    fn skip_reason(&self, config: &RepositoryBuildConfiguration) -> Option<SkipReason> {
        let repository = &config.repository;
        if repository.effective_settings().opted_out() {
            Some(SkipReason::OptedOut)
        } else if !self.filter.matches(&repository.name, &repository.topics) {
            Some(SkipReason::NotSubscribed)
        } else {
            None
        }
    }

    pub fn plan(&self, config: &RepositoryBuildConfiguration) -> ReconcilePlan {
        if let Some(reason) = self.skip_reason(config) {
            return ReconcilePlan {
                skipped: Some(reason),
                ..Default::default()
            };
        }
        ReconcilePlan {
            skipped: None,
            create: config
                .new_monitored_branches()
                .iter()
                .map(|b| b.name.clone())
                .collect(),
            delete: config
                .obsolete_pipelines()
                .iter()
                .map(|s| s.branch_name.clone())
                .collect(),
        }
    }

    #[tracing::instrument(skip_all, fields(owner = %config.repository.owner, repository = %config.repository.name))]
    pub async fn reconcile(&self, config: &RepositoryBuildConfiguration) -> ReconcileReport {
        let repository = &config.repository;
        let mut report = ReconcileReport {
            owner: repository.owner.clone(),
            repository: repository.name.clone(),
            ..Default::default()
        };

        let plan = self.plan(config);
        if let Some(reason) = plan.skipped {
            tracing::info!(?reason, "skipping repository");
            report.skipped = Some(reason);
            return report;
        }

        let overrides =
            PipelineOverrides::from_settings(&repository.effective_settings(), self.artifacts_bucket.as_deref());

        let creates = plan.create.iter().map(|branch| {
            let request = PipelineRequest {
                owner: repository.owner.clone(),
                repository: repository.name.clone(),
                branch: branch.clone(),
                overrides: overrides.clone(),
            };
            async move { (request.branch.clone(), self.stacks.create_pipeline(&request).await) }
        });

        let (deletable, retained): (Vec<String>, Vec<String>) = if self.allow_deletion {
            (plan.delete.clone(), Vec::new())
        } else {
            (Vec::new(), plan.delete.clone())
        };
        let deletes = deletable.iter().map(|branch| async move {
            let result = self
                .stacks
                .delete_pipeline(&repository.owner, &repository.name, branch)
                .await;
            (branch.clone(), result)
        });

        let (created, deleted) = futures::join!(join_all(creates), join_all(deletes));

        for (branch, result) in created {
            match result {
                Ok(stack) => {
                    tracing::info!(branch = %branch, stack = %stack.stack_name, "created pipeline");
                    report.created.push(CreatedPipeline {
                        branch,
                        stack_name: stack.stack_name,
                        stack_id: stack.stack_id,
                    });
                }
                Err(e) => {
                    tracing::error!(branch = %branch, error = %e, "pipeline creation failed");
                    report.errors.push(BranchFailure {
                        branch,
                        action: PipelineAction::Create,
                        error: e.to_string(),
                    });
                }
            }
        }

        for (branch, result) in deleted {
            match result {
                Ok(Some(stack)) => {
                    tracing::info!(branch = %branch, stack = %stack.stack_name, "deleted pipeline");
                    report.deleted.push(branch);
                }
                Ok(None) => {
                    tracing::debug!(branch = %branch, "pipeline already gone");
                    report.deleted.push(branch);
                }
                Err(e) => {
                    tracing::error!(branch = %branch, error = %e, "pipeline deletion failed");
                    report.errors.push(BranchFailure {
                        branch,
                        action: PipelineAction::Delete,
                        error: e.to_string(),
                    });
                }
            }
        }

        for branch in &retained {
            tracing::warn!(branch = %branch, "pipeline deletion disabled, retaining obsolete stack");
        }
        report.retained = retained;

        report
    }
}
