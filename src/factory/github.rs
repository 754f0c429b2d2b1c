use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::credentials::OrganizationCredentialsProvider;
use super::models::{BranchRef, CommitInfo, RepositoryDetails, RepositorySummary};
use crate::errors::{FactoryError, FactoryResult};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "pipeline-factory";
const PER_PAGE: usize = 100;

/// Read-only access to repositories of one organization.
/// Real implementation: `GitHubClient`. Test double: `FakeSourceControl`.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn list_organization_repositories(
        &self,
        organization: &str,
    ) -> FactoryResult<Vec<RepositorySummary>>;

    async fn get_repository(&self, owner: &str, name: &str) -> FactoryResult<RepositoryDetails>;

    /// `Ok(None)` when the file does not exist at `git_ref`.
    async fn fetch_file_content(
        &self,
        owner: &str,
        repository: &str,
        git_ref: &str,
        path: &str,
    ) -> FactoryResult<Option<String>>;

    async fn get_commit_info(
        &self,
        owner: &str,
        repository: &str,
        sha: &str,
    ) -> FactoryResult<CommitInfo>;
}

/// Builds a `SourceControl` authenticated for one organization.
#[async_trait]
pub trait SourceControlConnector: Send + Sync {
    async fn connect(&self, organization: &str) -> FactoryResult<Arc<dyn SourceControl>>;
}

// ── Wire types (subset of fields we care about) ──────────────────────

#[derive(Debug, Deserialize)]
struct GitHubOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    id: u64,
    name: String,
    owner: Option<GitHubOwner>,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubBranchCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubBranch {
    name: String,
    commit: GitHubBranchCommit,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitAuthor {
    name: String,
    date: String,
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    author: GitHubCommitAuthor,
    message: String,
    html_url: String,
}

// ── Client ───────────────────────────────────────────────────────────

/// GitHub REST client for one organization's token.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.get_as(path, "application/vnd.github+json")
    }

    fn get_as(&self, path: &str, accept: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", accept)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> FactoryResult<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| FactoryError::GitHub(format!("Failed to send {} request: {}", what, e)))
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> FactoryResult<T> {
        let status = resp.status();
        if !status.is_success() {
            return Err(FactoryError::GitHub(format!(
                "{} request returned status {}",
                what, status
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| FactoryError::GitHub(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Fetch every page of a list endpoint.
    async fn get_all_pages<T: DeserializeOwned>(&self, path: &str, what: &str) -> FactoryResult<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let request = self
                .get(path)
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
            let resp = self.send(request, what).await?;
            let items: Vec<T> = Self::parse(resp, what).await?;
            let count = items.len();
            all.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn list_organization_repositories(
        &self,
        organization: &str,
    ) -> FactoryResult<Vec<RepositorySummary>> {
        let repos: Vec<GitHubRepo> = self
            .get_all_pages(&format!("/orgs/{}/repos", organization), "organization repositories")
            .await?;

        Ok(repos
            .into_iter()
            .map(|r| RepositorySummary {
                owner: r
                    .owner
                    .map(|o| o.login)
                    .unwrap_or_else(|| organization.to_string()),
                name: r.name,
                id: r.id.to_string(),
                topics: r.topics,
            })
            .collect())
    }

    async fn get_repository(&self, owner: &str, name: &str) -> FactoryResult<RepositoryDetails> {
        let resp = self
            .send(self.get(&format!("/repos/{}/{}", owner, name)), "repository")
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(FactoryError::RepositoryNotFound {
                owner: owner.to_string(),
                repository: name.to_string(),
            });
        }
        let repo: GitHubRepo = Self::parse(resp, "repository").await?;

        let branches: Vec<GitHubBranch> = self
            .get_all_pages(&format!("/repos/{}/{}/branches", owner, name), "branches")
            .await?;

        let default_branch = repo.default_branch.ok_or_else(|| {
            FactoryError::GitHub(format!("Repository {}/{} has no default branch", owner, name))
        })?;

        Ok(RepositoryDetails {
            name: repo.name,
            owner: owner.to_string(),
            id: repo.id.to_string(),
            default_branch,
            topics: repo.topics,
            branches: branches
                .into_iter()
                .map(|b| BranchRef {
                    name: b.name,
                    commit_sha: b.commit.sha,
                })
                .collect(),
        })
    }

    async fn fetch_file_content(
        &self,
        owner: &str,
        repository: &str,
        git_ref: &str,
        path: &str,
    ) -> FactoryResult<Option<String>> {
        let request = self
            .get_as(
                &format!("/repos/{}/{}/contents/{}", owner, repository, path),
                "application/vnd.github.raw",
            )
            .query(&[("ref", git_ref)]);
        let resp = self.send(request, "file contents").await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(FactoryError::GitHub(format!(
                "file contents request for {} returned status {}",
                path,
                resp.status()
            )));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FactoryError::GitHub(format!("Failed to read {}: {}", path, e)))?;
        Ok(Some(body))
    }

    async fn get_commit_info(
        &self,
        owner: &str,
        repository: &str,
        sha: &str,
    ) -> FactoryResult<CommitInfo> {
        let resp = self
            .send(
                self.get(&format!("/repos/{}/{}/git/commits/{}", owner, repository, sha)),
                "commit",
            )
            .await?;
        let commit: GitHubCommit = Self::parse(resp, "commit").await?;
        Ok(CommitInfo {
            author: commit.author.name,
            message: commit.message,
            url: commit.html_url,
            date: commit.author.date,
        })
    }
}

/// Connects to GitHub with the token the credentials provider holds for each
/// organization.
pub struct GitHubConnector {
    api_url: String,
    credentials: Arc<dyn OrganizationCredentialsProvider>,
}

impl GitHubConnector {
    pub fn new(api_url: &str, credentials: Arc<dyn OrganizationCredentialsProvider>) -> Self {
        Self {
            api_url: api_url.to_string(),
            credentials,
        }
    }
}

#[async_trait]
impl SourceControlConnector for GitHubConnector {
    async fn connect(&self, organization: &str) -> FactoryResult<Arc<dyn SourceControl>> {
        let credentials = self.credentials.get(organization).await?;
        Ok(Arc::new(GitHubClient::new(&self.api_url, &credentials.token)))
    }
}
