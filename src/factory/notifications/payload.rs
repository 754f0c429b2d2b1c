//! Pipeline and build events, and the payload built from them.
//!
//! Two event sources share one payload shape. `EventSource` selects the
//! strategy: CodePipeline events are resolved through the stack registry and
//! the pipeline execution history, CodeBuild events carry their source
//! information in the build's exported environment.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{FactoryError, FactoryResult};
use crate::factory::github::SourceControl;
use crate::factory::models::PipelineState;
use crate::factory::stacks::StackRegistry;

pub const CODE_PIPELINE_DETAIL_TYPE: &str = "CodePipeline Pipeline Execution State Change";
pub const CODE_BUILD_DETAIL_TYPE: &str = "CodeBuild Build State Change";

const ENV_REPOSITORY: &str = "GITHUB_REPOSITORY";
const ENV_BRANCH: &str = "GITHUB_REPOSITORY_BRANCH";
const ENV_SHA: &str = "GITHUB_SHA";

/// Raw state-change event as delivered by the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    CodePipeline,
    CodeBuild,
}

/// Build facts exported by a CodeBuild event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildDetail {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub sha: Option<String>,
    pub logs_link: Option<String>,
    pub failed_phase: Option<String>,
}

/// A recognised pipeline or build state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineEventDetail {
    pub name: String,
    pub execution_id: String,
    pub state: PipelineState,
    pub source: EventSource,
    pub build: Option<BuildDetail>,
}

fn str_at<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(serde_json::Value::as_str)
}

impl PipelineEventDetail {
    /// `None` for events of other types and for states no rule can fire on.
    pub fn from_event(event: &ExecutionEvent) -> Option<Self> {
        let detail = &event.detail;
        match event.detail_type.as_str() {
            CODE_PIPELINE_DETAIL_TYPE => Some(Self {
                name: str_at(detail, "pipeline")?.to_string(),
                execution_id: str_at(detail, "execution-id")?.to_string(),
                state: str_at(detail, "state")?.parse().ok()?,
                source: EventSource::CodePipeline,
                build: None,
            }),
            CODE_BUILD_DETAIL_TYPE => Some(Self {
                name: str_at(detail, "project-name")?.to_string(),
                execution_id: str_at(detail, "build-id")?.to_string(),
                state: str_at(detail, "build-status")?.parse().ok()?,
                source: EventSource::CodeBuild,
                build: Some(Self::build_detail(detail)),
            }),
            _ => None,
        }
    }

    fn build_detail(detail: &serde_json::Value) -> BuildDetail {
        let info = detail.get("additional-information");
        let env = |name: &str| {
            info?
                .pointer("/environment/environment-variables")?
                .as_array()?
                .iter()
                .find(|v| str_at(v, "name") == Some(name))
                .and_then(|v| str_at(v, "value"))
                .map(str::to_string)
        };
        BuildDetail {
            repository: env(ENV_REPOSITORY),
            branch: env(ENV_BRANCH),
            sha: env(ENV_SHA),
            logs_link: info
                .and_then(|i| i.pointer("/logs/deep-link"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            failed_phase: info
                .and_then(|i| i.get("phases"))
                .and_then(serde_json::Value::as_array)
                .and_then(|phases| {
                    phases
                        .iter()
                        .find(|p| str_at(p, "phase-status") == Some("FAILED"))
                        .and_then(|p| str_at(p, "phase-type"))
                })
                .map(str::to_string),
        }
    }
}

/// The failing action of a pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    pub name: String,
    pub summary: Option<String>,
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub status: String,
    pub revision_id: Option<String>,
    pub revision_url: Option<String>,
    pub revision_summary: Option<String>,
    pub failed_action: Option<FailedAction>,
}

/// Pipeline execution history.
/// Real implementation: `InMemoryStackRegistry`.
#[async_trait]
pub trait PipelineExecutions: Send + Sync {
    async fn get_pipeline_execution(&self, pipeline: &str, execution_id: &str) -> FactoryResult<PipelineExecution>;
}

/// Which branch of which repository an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeSource {
    pub owner: String,
    pub repository: String,
    pub branch: String,
}

/// Accepts `owner/repo`, a clone URL or a web URL.
pub fn parse_repository(value: &str) -> Option<(String, String)> {
    let trimmed = value.trim().trim_end_matches('/').trim_end_matches(".git");
    let mut parts = trimmed.rsplit(['/', ':']);
    let repository = parts.next().filter(|s| !s.is_empty())?;
    let owner = parts.next().filter(|s| !s.is_empty())?;
    Some((owner.to_string(), repository.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub name: String,
    pub state: String,
    pub execution_id: String,
    pub commit_url: String,
    pub commit_message: String,
    pub commit_author: String,
    pub commit_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_phase: Option<String>,
}

impl NotificationPayload {
    /// Present fields in display order.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![
            ("name", self.name.as_str()),
            ("state", self.state.as_str()),
            ("executionId", self.execution_id.as_str()),
            ("commitUrl", self.commit_url.as_str()),
            ("commitMessage", self.commit_message.as_str()),
            ("commitAuthor", self.commit_author.as_str()),
            ("commitDate", self.commit_date.as_str()),
        ];
        let optional = [
            ("failureLogs", &self.failure_logs),
            ("failureSummary", &self.failure_summary),
            ("failurePhase", &self.failure_phase),
        ];
        fields.extend(optional.into_iter().filter_map(|(k, v)| v.as_deref().map(|v| (k, v))));
        fields
    }
}

pub struct PayloadBuilder {
    stacks: Arc<dyn StackRegistry>,
    executions: Arc<dyn PipelineExecutions>,
}

impl PayloadBuilder {
    pub fn new(stacks: Arc<dyn StackRegistry>, executions: Arc<dyn PipelineExecutions>) -> Self {
        Self { stacks, executions }
    }

    /// `Ok(None)` when the event cannot be traced to a repository branch,
    /// e.g. a pipeline the factory does not manage.
    pub async fn source_of(&self, detail: &PipelineEventDetail) -> FactoryResult<Option<CodeSource>> {
        match detail.source {
            EventSource::CodePipeline => Ok(self
                .stacks
                .find_stack_by_name(&detail.name)
                .await?
                .filter(|s| !s.owner.is_empty() && !s.repository.is_empty() && !s.branch_name.is_empty())
                .map(|s| CodeSource {
                    owner: s.owner,
                    repository: s.repository,
                    branch: s.branch_name,
                })),
            EventSource::CodeBuild => {
                let Some(build) = &detail.build else {
                    return Ok(None);
                };
                let repository = build.repository.as_deref().and_then(parse_repository);
                Ok(repository.zip(build.branch.clone()).map(|((owner, repository), branch)| CodeSource {
                    owner,
                    repository,
                    branch,
                }))
            }
        }
    }

    pub async fn build(
        &self,
        detail: &PipelineEventDetail,
        code: &CodeSource,
        source: &dyn SourceControl,
    ) -> FactoryResult<NotificationPayload> {
        match detail.source {
            EventSource::CodePipeline => self.code_pipeline(detail, code, source).await,
            EventSource::CodeBuild => Self::code_build(detail, code, source).await,
        }
    }

    async fn code_pipeline(
        &self,
        detail: &PipelineEventDetail,
        code: &CodeSource,
        source: &dyn SourceControl,
    ) -> FactoryResult<NotificationPayload> {
        let execution = self
            .executions
            .get_pipeline_execution(&detail.name, &detail.execution_id)
            .await?;
        let sha = execution.revision_id.as_deref().ok_or_else(|| {
            FactoryError::Notification(format!("Execution {} has no source revision", detail.execution_id))
        })?;
        let commit = source.get_commit_info(&code.owner, &code.repository, sha).await?;

        let failed = if detail.state == PipelineState::Failed {
            execution.failed_action
        } else {
            None
        };

        Ok(NotificationPayload {
            name: detail.name.clone(),
            state: detail.state.as_str().to_string(),
            execution_id: detail.execution_id.clone(),
            commit_url: if commit.url.is_empty() {
                execution.revision_url.unwrap_or_default()
            } else {
                commit.url
            },
            commit_message: if commit.message.is_empty() {
                execution.revision_summary.unwrap_or_default()
            } else {
                commit.message
            },
            commit_author: commit.author,
            commit_date: commit.date,
            failure_logs: failed.as_ref().and_then(|f| f.external_url.clone()),
            failure_summary: failed.as_ref().and_then(|f| f.summary.clone()),
            failure_phase: failed.map(|f| f.name),
        })
    }

    async fn code_build(
        detail: &PipelineEventDetail,
        code: &CodeSource,
        source: &dyn SourceControl,
    ) -> FactoryResult<NotificationPayload> {
        let build = detail.build.clone().unwrap_or_default();
        let sha = build.sha.as_deref().ok_or_else(|| {
            FactoryError::Notification(format!("Build {} does not export {}", detail.execution_id, ENV_SHA))
        })?;
        let commit = source.get_commit_info(&code.owner, &code.repository, sha).await?;
        let failed = detail.state == PipelineState::Failed;

        Ok(NotificationPayload {
            name: detail.name.clone(),
            state: detail.state.as_str().to_string(),
            execution_id: detail.execution_id.clone(),
            commit_url: commit.url,
            commit_message: commit.message,
            commit_author: commit.author,
            commit_date: commit.date,
            failure_logs: build.logs_link.filter(|_| failed),
            failure_summary: build
                .failed_phase
                .as_ref()
                .filter(|_| failed)
                .map(|phase| format!("Build failed in phase {}", phase)),
            failure_phase: build.failed_phase.filter(|_| failed),
        })
    }
}
