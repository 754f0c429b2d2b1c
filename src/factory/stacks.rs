//! Stack registry gateway: the record of which branches have pipelines.
//!
//! Provisioned pipelines are identified purely by their tags
//! (`owner`, `repository`, `branch`, `service=pipeline-factory`). The registry
//! is the system of record for "already monitored"; nothing else is persisted.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::models::{
    PipelineRequest, ProvisionedStack, SERVICE_TAG_VALUE, StackInformation, TAG_BRANCH, TAG_OWNER,
    TAG_REPOSITORY, TAG_SERVICE,
};
use super::notifications::payload::{PipelineExecution, PipelineExecutions};
use crate::errors::{FactoryError, FactoryResult};

const MAX_STACK_NAME_LEN: usize = 128;

/// Find, create and delete pipeline stacks keyed by (owner, repository, branch).
/// Real implementation: `InMemoryStackRegistry`. Test double: `FailingStackRegistry`.
#[async_trait]
pub trait StackRegistry: Send + Sync {
    async fn find_provisioned_branches(
        &self,
        owner: &str,
        repository: &str,
    ) -> FactoryResult<Vec<StackInformation>>;

    async fn find_stack_by_name(&self, stack_name: &str) -> FactoryResult<Option<StackInformation>>;

    /// Must be idempotent: a second request for the same branch returns the
    /// existing stack.
    async fn create_pipeline(&self, request: &PipelineRequest) -> FactoryResult<ProvisionedStack>;

    /// `Ok(None)` when no stack matches.
    async fn delete_pipeline(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> FactoryResult<Option<StackInformation>>;
}

/// Convert a name to a stack-name-safe slug, limited to `max_len` characters.
pub fn slugify(name: &str, max_len: usize) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// `<owner>-<repository>-<branch>` as a valid stack name.
pub fn stack_name_for(owner: &str, repository: &str, branch: &str) -> String {
    slugify(&format!("{}-{}-{}", owner, repository, branch), MAX_STACK_NAME_LEN)
}

#[derive(Debug, Clone)]
struct StackRecord {
    name: String,
    id: String,
    tags: HashMap<String, String>,
}

impl StackRecord {
    fn info(&self) -> StackInformation {
        StackInformation::from_tags(&self.name, &self.tags)
    }

    fn is_factory_stack(&self) -> bool {
        self.tags.get(TAG_SERVICE).map(String::as_str) == Some(SERVICE_TAG_VALUE)
    }

    fn belongs_to(&self, owner: &str, repository: &str) -> bool {
        let tag = |key: &str| self.tags.get(key).map(String::as_str).unwrap_or_default();
        self.is_factory_stack()
            && tag(TAG_OWNER).eq_ignore_ascii_case(owner)
            && tag(TAG_REPOSITORY).eq_ignore_ascii_case(repository)
    }

    fn tracks_branch(&self, owner: &str, repository: &str, branch: &str) -> bool {
        self.belongs_to(owner, repository)
            && self
                .tags
                .get(TAG_BRANCH)
                .is_some_and(|b| b.eq_ignore_ascii_case(branch))
    }
}

/// Process-local registry of pipeline stacks and their executions.
#[derive(Default)]
pub struct InMemoryStackRegistry {
    stacks: Mutex<Vec<StackRecord>>,
    executions: Mutex<HashMap<(String, String), PipelineExecution>>,
}

impl InMemoryStackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_stacks(&self) -> FactoryResult<std::sync::MutexGuard<'_, Vec<StackRecord>>> {
        self.stacks
            .lock()
            .map_err(|_| FactoryError::StackRegistry("Stack registry lock poisoned".into()))
    }

    /// Every stack currently held, in creation order.
    pub fn list_stacks(&self) -> FactoryResult<Vec<StackInformation>> {
        Ok(self.lock_stacks()?.iter().map(StackRecord::info).collect())
    }

    /// Register a stack not created through `create_pipeline`, e.g. one that
    /// predates the factory or was tagged by hand.
    pub fn insert_stack(&self, stack_name: &str, tags: HashMap<String, String>) -> FactoryResult<()> {
        self.lock_stacks()?.push(StackRecord {
            name: stack_name.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            tags,
        });
        Ok(())
    }

    /// Record the state of one pipeline execution for notification lookups.
    pub fn record_execution(&self, pipeline: &str, execution_id: &str, execution: PipelineExecution) -> FactoryResult<()> {
        self.executions
            .lock()
            .map_err(|_| FactoryError::StackRegistry("Execution history lock poisoned".into()))?
            .insert((pipeline.to_string(), execution_id.to_string()), execution);
        Ok(())
    }
}

#[async_trait]
impl StackRegistry for InMemoryStackRegistry {
    async fn find_provisioned_branches(
        &self,
        owner: &str,
        repository: &str,
    ) -> FactoryResult<Vec<StackInformation>> {
        Ok(self
            .lock_stacks()?
            .iter()
            .filter(|s| s.belongs_to(owner, repository))
            .map(StackRecord::info)
            .collect())
    }

    async fn find_stack_by_name(&self, stack_name: &str) -> FactoryResult<Option<StackInformation>> {
        Ok(self
            .lock_stacks()?
            .iter()
            .find(|s| s.name == stack_name)
            .map(StackRecord::info))
    }

    async fn create_pipeline(&self, request: &PipelineRequest) -> FactoryResult<ProvisionedStack> {
        let mut stacks = self.lock_stacks()?;

        if let Some(existing) = stacks
            .iter()
            .find(|s| s.tracks_branch(&request.owner, &request.repository, &request.branch))
        {
            tracing::debug!(stack = %existing.name, "pipeline stack already exists");
            return Ok(ProvisionedStack {
                stack_name: existing.name.clone(),
                stack_id: existing.id.clone(),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut name = stack_name_for(&request.owner, &request.repository, &request.branch);
        if stacks.iter().any(|s| s.name == name) {
            // A different branch slugged to the same name.
            let base = slugify(&name, MAX_STACK_NAME_LEN - 9);
            name = format!("{}-{}", base, &id[..8]);
        }

        let tags = HashMap::from([
            (TAG_OWNER.to_string(), request.owner.clone()),
            (TAG_REPOSITORY.to_string(), request.repository.clone()),
            (TAG_BRANCH.to_string(), request.branch.clone()),
            (TAG_SERVICE.to_string(), SERVICE_TAG_VALUE.to_string()),
        ]);
        tracing::info!(stack = %name, overrides = ?request.overrides, "creating pipeline stack");
        stacks.push(StackRecord {
            name: name.clone(),
            id: id.clone(),
            tags,
        });

        Ok(ProvisionedStack {
            stack_name: name,
            stack_id: id,
        })
    }

    async fn delete_pipeline(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> FactoryResult<Option<StackInformation>> {
        let mut stacks = self.lock_stacks()?;
        let Some(index) = stacks
            .iter()
            .position(|s| s.tracks_branch(owner, repository, branch))
        else {
            return Ok(None);
        };
        let removed = stacks.remove(index);
        tracing::info!(stack = %removed.name, "deleted pipeline stack");
        Ok(Some(removed.info()))
    }
}

#[async_trait]
impl PipelineExecutions for InMemoryStackRegistry {
    async fn get_pipeline_execution(
        &self,
        pipeline: &str,
        execution_id: &str,
    ) -> FactoryResult<PipelineExecution> {
        self.executions
            .lock()
            .map_err(|_| FactoryError::StackRegistry("Execution history lock poisoned".into()))?
            .get(&(pipeline.to_string(), execution_id.to_string()))
            .cloned()
            .ok_or_else(|| FactoryError::ExecutionNotFound {
                pipeline: pipeline.to_string(),
                execution_id: execution_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::models::PipelineOverrides;

    fn request(branch: &str) -> PipelineRequest {
        PipelineRequest {
            owner: "acme".into(),
            repository: "stage-api".into(),
            branch: branch.into(),
            overrides: PipelineOverrides::default(),
        }
    }

    #[test]
    fn slugify_replaces_separators() {
        assert_eq!(slugify("Feature/Login_Form", 40), "feature-login-form");
        assert_eq!(slugify("--a--b--", 40), "a-b");
    }

    #[test]
    fn slugify_truncates_without_trailing_dash() {
        assert_eq!(slugify("abc-defgh", 4), "abc");
    }

    #[test]
    fn stack_name_joins_parts() {
        assert_eq!(stack_name_for("acme", "stage-api", "release/1.0"), "acme-stage-api-release-1-0");
    }

    #[tokio::test]
    async fn colliding_long_branches_stay_within_name_limit() {
        let registry = InMemoryStackRegistry::new();
        let prefix = "x".repeat(200);
        let first = registry.create_pipeline(&request(&format!("{}/a", prefix))).await.unwrap();
        let second = registry.create_pipeline(&request(&format!("{}/b", prefix))).await.unwrap();

        assert_eq!(first.stack_name.len(), MAX_STACK_NAME_LEN);
        assert_ne!(first.stack_name, second.stack_name);
        assert!(second.stack_name.len() <= MAX_STACK_NAME_LEN, "{}", second.stack_name.len());
        assert_eq!(registry.list_stacks().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_then_find() {
        let registry = InMemoryStackRegistry::new();
        let stack = registry.create_pipeline(&request("main")).await.unwrap();
        assert_eq!(stack.stack_name, "acme-stage-api-main");

        let found = registry.find_provisioned_branches("acme", "stage-api").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].branch_name, "main");
        assert_eq!(found[0].owner, "acme");
    }

    #[tokio::test]
    async fn create_is_idempotent_across_case() {
        let registry = InMemoryStackRegistry::new();
        let first = registry.create_pipeline(&request("Develop")).await.unwrap();
        let second = registry.create_pipeline(&request("develop")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.list_stacks().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn colliding_slugs_get_distinct_names() {
        let registry = InMemoryStackRegistry::new();
        let a = registry.create_pipeline(&request("feature/x")).await.unwrap();
        let b = registry.create_pipeline(&request("feature-x")).await.unwrap();
        assert_ne!(a.stack_name, b.stack_name);
        assert_eq!(registry.list_stacks().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn find_ignores_other_repositories_and_foreign_stacks() {
        let registry = InMemoryStackRegistry::new();
        registry.create_pipeline(&request("main")).await.unwrap();
        registry
            .insert_stack(
                "hand-made",
                HashMap::from([
                    (TAG_OWNER.to_string(), "acme".to_string()),
                    (TAG_REPOSITORY.to_string(), "stage-api".to_string()),
                    (TAG_BRANCH.to_string(), "legacy".to_string()),
                ]),
            )
            .unwrap();

        let found = registry.find_provisioned_branches("acme", "stage-api").await.unwrap();
        assert_eq!(found.len(), 1, "stacks without the service tag are not ours");
        assert!(registry.find_provisioned_branches("acme", "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_matching_stack() {
        let registry = InMemoryStackRegistry::new();
        registry.create_pipeline(&request("main")).await.unwrap();

        let deleted = registry.delete_pipeline("acme", "stage-api", "MAIN").await.unwrap();
        assert_eq!(deleted.map(|s| s.branch_name), Some("main".to_string()));
        assert!(registry.list_stacks().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_stack_is_none() {
        let registry = InMemoryStackRegistry::new();
        assert!(registry.delete_pipeline("acme", "stage-api", "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_stack_by_name() {
        let registry = InMemoryStackRegistry::new();
        let stack = registry.create_pipeline(&request("main")).await.unwrap();
        let info = registry.find_stack_by_name(&stack.stack_name).await.unwrap().unwrap();
        assert_eq!(info.repository, "stage-api");
        assert!(registry.find_stack_by_name("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn executions_round_trip_and_missing_is_error() {
        let registry = InMemoryStackRegistry::new();
        let execution = PipelineExecution {
            status: "Succeeded".into(),
            revision_id: Some("abc".into()),
            revision_url: None,
            revision_summary: None,
            failed_action: None,
        };
        registry.record_execution("p", "e1", execution.clone()).unwrap();
        assert_eq!(registry.get_pipeline_execution("p", "e1").await.unwrap(), execution);
        assert!(matches!(
            registry.get_pipeline_execution("p", "e2").await,
            Err(FactoryError::ExecutionNotFound { .. })
        ));
    }
}
