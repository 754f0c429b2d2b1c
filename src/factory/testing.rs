//! Hand-written doubles of the gateway traits, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::github::{SourceControl, SourceControlConnector};
use super::models::{
    CommitInfo, NotificationTarget, PipelineRequest, ProvisionedStack, RepositoryDetails, RepositorySummary,
    SERVICE_TAG_VALUE, StackInformation, TAG_BRANCH, TAG_OWNER, TAG_REPOSITORY, TAG_SERVICE,
};
use super::notifications::payload::NotificationPayload;
use super::notifications::slack::NotificationSender;
use super::stacks::{InMemoryStackRegistry, StackRegistry};
use crate::errors::{FactoryError, FactoryResult};

pub fn summary(owner: &str, name: &str) -> RepositorySummary {
    RepositorySummary {
        name: name.to_string(),
        owner: owner.to_string(),
        id: name.to_string(),
        topics: vec![],
    }
}

// ── FakeSourceControl ────────────────────────────────────────────────

type FileKey = (String, String, String, String);

#[derive(Default)]
pub struct FakeSourceControl {
    summaries: Vec<RepositorySummary>,
    repositories: HashMap<(String, String), RepositoryDetails>,
    files: HashMap<FileKey, String>,
    commits: HashMap<(String, String, String), CommitInfo>,
    fail_files: bool,
}

impl FakeSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: RepositorySummary) -> Self {
        self.summaries.push(summary);
        self
    }

    /// Also lists the repository in its organization.
    pub fn with_repository(mut self, details: RepositoryDetails) -> Self {
        self.summaries.push(RepositorySummary {
            name: details.name.clone(),
            owner: details.owner.clone(),
            id: details.id.clone(),
            topics: details.topics.clone(),
        });
        self.repositories
            .insert((details.owner.clone(), details.name.clone()), details);
        self
    }

    pub fn with_file(mut self, owner: &str, repository: &str, git_ref: &str, path: &str, content: &str) -> Self {
        self.files.insert(
            (owner.into(), repository.into(), git_ref.into(), path.into()),
            content.to_string(),
        );
        self
    }

    pub fn with_commit(mut self, owner: &str, repository: &str, sha: &str, info: CommitInfo) -> Self {
        self.commits
            .insert((owner.into(), repository.into(), sha.into()), info);
        self
    }

    /// Every file fetch fails with a transient error.
    pub fn failing_files(mut self) -> Self {
        self.fail_files = true;
        self
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn list_organization_repositories(&self, organization: &str) -> FactoryResult<Vec<RepositorySummary>> {
        Ok(self
            .summaries
            .iter()
            .filter(|s| s.owner == organization)
            .cloned()
            .collect())
    }

    async fn get_repository(&self, owner: &str, name: &str) -> FactoryResult<RepositoryDetails> {
        self.repositories
            .get(&(owner.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| FactoryError::RepositoryNotFound {
                owner: owner.to_string(),
                repository: name.to_string(),
            })
    }

    async fn fetch_file_content(
        &self,
        owner: &str,
        repository: &str,
        git_ref: &str,
        path: &str,
    ) -> FactoryResult<Option<String>> {
        if self.fail_files {
            return Err(FactoryError::GitHub("simulated outage".into()));
        }
        Ok(self
            .files
            .get(&(
                owner.to_string(),
                repository.to_string(),
                git_ref.to_string(),
                path.to_string(),
            ))
            .cloned())
    }

    async fn get_commit_info(&self, owner: &str, repository: &str, sha: &str) -> FactoryResult<CommitInfo> {
        self.commits
            .get(&(owner.to_string(), repository.to_string(), sha.to_string()))
            .cloned()
            .ok_or_else(|| FactoryError::GitHub(format!("commit {} not found", sha)))
    }
}

/// Hands out the same fake for every organization.
pub struct FakeConnector {
    source: Arc<FakeSourceControl>,
}

impl FakeConnector {
    pub fn new(source: FakeSourceControl) -> Self {
        Self {
            source: Arc::new(source),
        }
    }
}

#[async_trait]
impl SourceControlConnector for FakeConnector {
    async fn connect(&self, _organization: &str) -> FactoryResult<Arc<dyn SourceControl>> {
        Ok(self.source.clone())
    }
}

// ── FailingStackRegistry ─────────────────────────────────────────────

/// In-memory registry whose creates and deletes fail for chosen branches.
pub struct FailingStackRegistry {
    inner: InMemoryStackRegistry,
    failing: HashSet<String>,
    fail_all: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<PipelineRequest>>,
}

impl FailingStackRegistry {
    pub fn failing_branches(branches: &[&str]) -> Self {
        Self {
            inner: InMemoryStackRegistry::new(),
            failing: branches.iter().map(|b| b.to_lowercase()).collect(),
            fail_all: false,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_everything() -> Self {
        Self {
            fail_all: true,
            ..Self::failing_branches(&[])
        }
    }

    /// Add a stack without going through the failure rules.
    pub fn seed(&self, owner: &str, repository: &str, branch: &str) {
        self.inner
            .insert_stack(
                &format!("{}-{}-{}", owner, repository, branch),
                HashMap::from([
                    (TAG_OWNER.to_string(), owner.to_string()),
                    (TAG_REPOSITORY.to_string(), repository.to_string()),
                    (TAG_BRANCH.to_string(), branch.to_string()),
                    (TAG_SERVICE.to_string(), SERVICE_TAG_VALUE.to_string()),
                ]),
            )
            .unwrap();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PipelineRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn check(&self, branch: Option<&str>) -> FactoryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fails = self.fail_all || branch.is_some_and(|b| self.failing.contains(&b.to_lowercase()));
        if fails {
            return Err(FactoryError::StackRegistry("simulated throttling".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StackRegistry for FailingStackRegistry {
    async fn find_provisioned_branches(&self, owner: &str, repository: &str) -> FactoryResult<Vec<StackInformation>> {
        self.check(None)?;
        self.inner.find_provisioned_branches(owner, repository).await
    }

    async fn find_stack_by_name(&self, stack_name: &str) -> FactoryResult<Option<StackInformation>> {
        self.check(None)?;
        self.inner.find_stack_by_name(stack_name).await
    }

    async fn create_pipeline(&self, request: &PipelineRequest) -> FactoryResult<ProvisionedStack> {
        self.requests.lock().unwrap().push(request.clone());
        self.check(Some(&request.branch))?;
        self.inner.create_pipeline(request).await
    }

    async fn delete_pipeline(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> FactoryResult<Option<StackInformation>> {
        self.check(Some(branch))?;
        self.inner.delete_pipeline(owner, repository, branch).await
    }
}

// ── RecordingSender ──────────────────────────────────────────────────

/// Records delivered channel ids; fails for chosen channels.
#[derive(Default)]
pub struct RecordingSender {
    failing: HashSet<String>,
    delivered: Mutex<Vec<String>>,
}

impl RecordingSender {
    pub fn failing_for(channels: &[&str]) -> Self {
        Self {
            failing: channels.iter().map(|c| c.to_string()).collect(),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, target: &NotificationTarget, _payload: &NotificationPayload) -> FactoryResult<()> {
        if self.failing.contains(&target.channel_id) {
            return Err(FactoryError::Notification(format!("{} unreachable", target.channel_id)));
        }
        self.delivered.lock().unwrap().push(target.channel_id.clone());
        Ok(())
    }
}
