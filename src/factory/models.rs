use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tag keys stamped on every provisioned pipeline stack.
pub const TAG_OWNER: &str = "owner";
pub const TAG_REPOSITORY: &str = "repository";
pub const TAG_BRANCH: &str = "branch";
pub const TAG_SERVICE: &str = "service";
pub const SERVICE_TAG_VALUE: &str = "pipeline-factory";

/// (owner, name) pair identifying a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    pub owner: String,
    pub name: String,
}

impl RepositoryIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A repository as returned by an organization listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    pub owner: String,
    pub id: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Raw branch reference as reported by source control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRef {
    pub name: String,
    pub commit_sha: String,
}

/// Repository metadata and branches as reported by source control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDetails {
    pub name: String,
    pub owner: String,
    pub id: String,
    pub default_branch: String,
    pub topics: Vec<String>,
    pub branches: Vec<BranchRef>,
}

/// A branch within one discovery cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit_sha: String,
    /// Owning repository, by identity only.
    pub repository: RepositoryIdentity,
    /// Settings read from this branch's own settings file, when resolved.
    pub settings: Option<SettingsOverrides>,
    /// Whether the repository settings request a pipeline for this branch.
    pub requested: bool,
}

/// A repository assembled from live source-control responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: String,
    pub default_branch: String,
    pub id: String,
    pub topics: Vec<String>,
    pub settings: Option<SettingsOverrides>,
    pub branches: Vec<Branch>,
}

impl Repository {
    /// Build from source-control details, annotating each branch with whether
    /// `settings` request it for monitoring.
    pub fn from_details(details: RepositoryDetails, settings: Option<SettingsOverrides>) -> Self {
        let identity = RepositoryIdentity::new(&details.owner, &details.name);
        let effective = settings.clone().unwrap_or_default();
        let branches = details
            .branches
            .into_iter()
            .map(|b| Branch {
                requested: effective.monitors_branch(&b.name, &details.default_branch),
                name: b.name,
                commit_sha: b.commit_sha,
                repository: identity.clone(),
                settings: None,
            })
            .collect();

        Self {
            name: details.name,
            owner: details.owner,
            default_branch: details.default_branch,
            id: details.id,
            topics: details.topics,
            settings,
            branches,
        }
    }

    /// Settings in effect; a missing settings file means all defaults.
    pub fn effective_settings(&self) -> SettingsOverrides {
        self.settings.clone().unwrap_or_default()
    }
}

/// Contents of `pipeline-factory.settings`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_spec_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_as_role_arn: Option<String>,
    #[serde(
        default,
        rename = "gitHubTokenSecretArn",
        skip_serializing_if = "Option::is_none"
    )]
    pub github_token_secret_arn: Option<String>,
    /// Branch names or glob patterns monitored in addition to the default branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitored_branches: Option<Vec<String>>,
    /// Repositories that deploy through GitHub Actions opt out of the factory.
    #[serde(
        default,
        rename = "deployViaGithubActions",
        skip_serializing_if = "Option::is_none"
    )]
    pub deploy_via_github_actions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Vec<NotificationRule>>,
}

/// One notification routing rule from the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRule {
    pub branches: Vec<String>,
    pub event: PipelineState,
    pub channel_id: String,
    pub channel_type: ChannelType,
}

impl NotificationRule {
    pub fn target(&self) -> NotificationTarget {
        NotificationTarget {
            channel_id: self.channel_id.clone(),
            channel_type: self.channel_type,
        }
    }
}

/// Where a notification is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTarget {
    pub channel_id: String,
    pub channel_type: ChannelType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Slack,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "SLACK",
        }
    }
}

/// Pipeline states a notification rule can fire on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Started,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for PipelineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STARTED" | "IN_PROGRESS" => Ok(Self::Started),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unsupported pipeline state: {}", s)),
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifying tags of a provisioned pipeline stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackInformation {
    pub stack_name: String,
    pub repository: String,
    pub owner: String,
    pub branch_name: String,
}

impl StackInformation {
    /// Project a stack's tags. Missing tags become empty strings.
    pub fn from_tags(stack_name: &str, tags: &HashMap<String, String>) -> Self {
        let tag = |key: &str| tags.get(key).cloned().unwrap_or_default();
        Self {
            stack_name: stack_name.to_string(),
            repository: tag(TAG_REPOSITORY),
            owner: tag(TAG_OWNER),
            branch_name: tag(TAG_BRANCH),
        }
    }
}

/// Settings-derived parameters passed along with a pipeline creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOverrides {
    pub build_spec_location: Option<String>,
    pub build_as_role_arn: Option<String>,
    pub github_token_secret_arn: Option<String>,
    pub artifacts_bucket: Option<String>,
}

impl PipelineOverrides {
    pub fn from_settings(settings: &SettingsOverrides, artifacts_bucket: Option<&str>) -> Self {
        Self {
            build_spec_location: settings.build_spec_location.clone(),
            build_as_role_arn: settings.build_as_role_arn.clone(),
            github_token_secret_arn: settings.github_token_secret_arn.clone(),
            artifacts_bucket: artifacts_bucket.map(str::to_string),
        }
    }
}

/// A request to provision one branch's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub overrides: PipelineOverrides,
}

/// Handle of a stack returned by a successful creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedStack {
    pub stack_name: String,
    pub stack_id: String,
}

/// Queue message asking a worker to re-evaluate one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryJob {
    pub name: String,
    pub owner: String,
}

impl DiscoveryJob {
    pub fn identity(&self) -> RepositoryIdentity {
        RepositoryIdentity::new(&self.owner, &self.name)
    }
}

impl From<&RepositorySummary> for DiscoveryJob {
    fn from(summary: &RepositorySummary) -> Self {
        Self {
            name: summary.name.clone(),
            owner: summary.owner.clone(),
        }
    }
}

/// Commit metadata used in notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub author: String,
    pub message: String,
    pub url: String,
    pub date: String,
}
