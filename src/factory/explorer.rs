//! Repository discovery: which repositories are subscribed, and what their
//! desired versus observed pipeline set looks like.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::build_config::RepositoryBuildConfiguration;
use super::github::{SourceControl, SourceControlConnector};
use super::models::{Repository, RepositoryIdentity, RepositorySummary};
use super::settings::SettingsResolver;
use super::stacks::StackRegistry;
use crate::errors::{FactoryError, FactoryResult};

/// Predicate deciding whether a repository opts into the factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SubscriptionFilter {
    All,
    NamePrefix(String),
    Topic(String),
}

impl SubscriptionFilter {
    pub fn matches(&self, name: &str, topics: &[String]) -> bool {
        match self {
            Self::All => true,
            Self::NamePrefix(prefix) => name.starts_with(prefix.as_str()),
            Self::Topic(topic) => topics.iter().any(|t| t.eq_ignore_ascii_case(topic)),
        }
    }

    pub fn matches_summary(&self, summary: &RepositorySummary) -> bool {
        self.matches(&summary.name, &summary.topics)
    }
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self::NamePrefix("stage".to_string())
    }
}

impl FromStr for SubscriptionFilter {
    type Err = FactoryError;

    /// `all`, `prefix:<p>` or `topic:<t>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let invalid = || FactoryError::Config(format!("Invalid subscription filter '{}'", s));
        let (kind, value) = s.split_once(':').ok_or_else(invalid)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(invalid());
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "prefix" => Ok(Self::NamePrefix(value.to_string())),
            "topic" => Ok(Self::Topic(value.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for SubscriptionFilter {
    type Error = FactoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubscriptionFilter> for String {
    fn from(filter: SubscriptionFilter) -> Self {
        filter.to_string()
    }
}

impl std::fmt::Display for SubscriptionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::NamePrefix(p) => write!(f, "prefix:{}", p),
            Self::Topic(t) => write!(f, "topic:{}", t),
        }
    }
}

/// Read-only composition of source control, settings and the stack registry.
pub struct RepositoryExplorer {
    source: Arc<dyn SourceControl>,
    stacks: Arc<dyn StackRegistry>,
    settings: SettingsResolver,
    filter: SubscriptionFilter,
}

impl RepositoryExplorer {
    pub fn new(
        source: Arc<dyn SourceControl>,
        stacks: Arc<dyn StackRegistry>,
        filter: SubscriptionFilter,
    ) -> Self {
        Self {
            settings: SettingsResolver::new(source.clone()),
            source,
            stacks,
            filter,
        }
    }

    /// Connect to `organization` and build an explorer for it.
    pub async fn connect(
        connector: &dyn SourceControlConnector,
        organization: &str,
        stacks: Arc<dyn StackRegistry>,
        filter: SubscriptionFilter,
    ) -> FactoryResult<Self> {
        let source = connector.connect(organization).await?;
        Ok(Self::new(source, stacks, filter))
    }

    pub async fn list_subscribed_repositories(
        &self,
        organization: &str,
    ) -> FactoryResult<Vec<RepositorySummary>> {
        let all = self.source.list_organization_repositories(organization).await?;
        let total = all.len();
        let subscribed: Vec<_> = all
            .into_iter()
            .filter(|r| self.filter.matches_summary(r))
            .collect();
        tracing::debug!(
            organization,
            total,
            subscribed = subscribed.len(),
            filter = %self.filter,
            "listed organization repositories"
        );
        Ok(subscribed)
    }

    /// Repository with branches and the settings of its default branch.
    pub async fn get_repository(&self, owner: &str, name: &str) -> FactoryResult<Repository> {
        let details = self.source.get_repository(owner, name).await?;
        let settings = self
            .settings
            .fetch(owner, name, &details.default_branch)
            .await?;
        Ok(Repository::from_details(details, settings))
    }

    #[tracing::instrument(skip(self), fields(repository = %identity))]
    pub async fn build_configuration(
        &self,
        identity: &RepositoryIdentity,
    ) -> FactoryResult<RepositoryBuildConfiguration> {
        let repository = self.get_repository(&identity.owner, &identity.name).await?;
        let provisioned = self
            .stacks
            .find_provisioned_branches(&identity.owner, &identity.name)
            .await?;
        Ok(RepositoryBuildConfiguration::new(repository, provisioned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::models::{BranchRef, RepositoryDetails};
    use crate::factory::settings::SETTINGS_FILE_PATH;
    use crate::factory::stacks::InMemoryStackRegistry;
    use crate::factory::testing::{FakeSourceControl, summary};

    fn details(name: &str, branches: &[&str]) -> RepositoryDetails {
        RepositoryDetails {
            name: name.into(),
            owner: "acme".into(),
            id: "1".into(),
            default_branch: "main".into(),
            topics: vec![],
            branches: branches
                .iter()
                .map(|b| BranchRef {
                    name: b.to_string(),
                    commit_sha: format!("sha-{}", b),
                })
                .collect(),
        }
    }

    // ── SubscriptionFilter ───────────────────────────────────────────

    #[test]
    fn filter_parses_all_forms() {
        assert_eq!("all".parse::<SubscriptionFilter>().unwrap(), SubscriptionFilter::All);
        assert_eq!(
            "prefix:stage".parse::<SubscriptionFilter>().unwrap(),
            SubscriptionFilter::NamePrefix("stage".into())
        );
        assert_eq!(
            "topic:pipeline-factory".parse::<SubscriptionFilter>().unwrap(),
            SubscriptionFilter::Topic("pipeline-factory".into())
        );
    }

    #[test]
    fn filter_rejects_garbage() {
        assert!("prefix:".parse::<SubscriptionFilter>().is_err());
        assert!("stage".parse::<SubscriptionFilter>().is_err());
        assert!("regex:.*".parse::<SubscriptionFilter>().is_err());
    }

    #[test]
    fn filter_display_parses_back() {
        let filter = SubscriptionFilter::Topic("ci".into());
        assert_eq!(filter.to_string().parse::<SubscriptionFilter>().unwrap(), filter);
    }

    #[test]
    fn topic_filter_is_case_insensitive() {
        let filter = SubscriptionFilter::Topic("CI".into());
        assert!(filter.matches("anything", &["ci".to_string()]));
        assert!(!filter.matches("anything", &[]));
    }

    // ── RepositoryExplorer ───────────────────────────────────────────

    #[tokio::test]
    async fn lists_only_subscribed_repositories() {
        let source = FakeSourceControl::new()
            .with_summary(summary("acme", "stage-R1"))
            .with_summary(summary("acme", "stage-R3"))
            .with_summary(summary("acme", "R2"));
        let explorer = RepositoryExplorer::new(
            Arc::new(source),
            Arc::new(InMemoryStackRegistry::new()),
            SubscriptionFilter::NamePrefix("stage".into()),
        );

        let names: Vec<_> = explorer
            .list_subscribed_repositories("acme")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["stage-R1", "stage-R3"]);
    }

    #[tokio::test]
    async fn build_configuration_reads_default_branch_settings() {
        let source = FakeSourceControl::new()
            .with_repository(details("stage-api", &["main", "develop", "scratch"]))
            .with_file(
                "acme",
                "stage-api",
                "main",
                SETTINGS_FILE_PATH,
                r#"{"monitoredBranches": ["develop"]}"#,
            );
        let explorer = RepositoryExplorer::new(
            Arc::new(source),
            Arc::new(InMemoryStackRegistry::new()),
            SubscriptionFilter::All,
        );

        let config = explorer
            .build_configuration(&RepositoryIdentity::new("acme", "stage-api"))
            .await
            .unwrap();
        let requested: Vec<_> = config.requested_branches().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(requested, vec!["main", "develop"]);
    }

    #[tokio::test]
    async fn build_configuration_fails_on_malformed_settings() {
        let source = FakeSourceControl::new()
            .with_repository(details("stage-api", &["main"]))
            .with_file("acme", "stage-api", "main", SETTINGS_FILE_PATH, "{oops");
        let explorer = RepositoryExplorer::new(
            Arc::new(source),
            Arc::new(InMemoryStackRegistry::new()),
            SubscriptionFilter::All,
        );

        let err = explorer
            .build_configuration(&RepositoryIdentity::new("acme", "stage-api"))
            .await
            .unwrap_err();
        assert!(err.is_data_error());
    }

    #[tokio::test]
    async fn missing_repository_surfaces_not_found() {
        let explorer = RepositoryExplorer::new(
            Arc::new(FakeSourceControl::new()),
            Arc::new(InMemoryStackRegistry::new()),
            SubscriptionFilter::All,
        );
        let err = explorer.get_repository("acme", "gone").await.unwrap_err();
        assert!(matches!(err, FactoryError::RepositoryNotFound { .. }));
    }
}
