//! Per-organization GitHub credentials.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::{FactoryError, FactoryResult};

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Format check only; does not verify the token is active.
pub fn is_valid_github_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    GITHUB_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

#[derive(Clone)]
pub struct OrganizationCredentials {
    pub token: String,
}

impl std::fmt::Debug for OrganizationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrganizationCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait OrganizationCredentialsProvider: Send + Sync {
    async fn get(&self, organization: &str) -> FactoryResult<OrganizationCredentials>;
}

/// `GITHUB_TOKEN_ACME_CORP` for organization `acme-corp`.
pub fn organization_token_variable(organization: &str) -> String {
    let suffix: String = organization
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("GITHUB_TOKEN_{}", suffix)
}

/// Reads tokens from the environment: the organization-specific variable
/// first, then `GITHUB_TOKEN`.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialsProvider;

impl EnvCredentialsProvider {
    fn lookup(organization: &str, var: impl Fn(&str) -> Option<String>) -> FactoryResult<OrganizationCredentials> {
        let token = var(&organization_token_variable(organization))
            .or_else(|| var("GITHUB_TOKEN"))
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| FactoryError::MissingCredentials {
                organization: organization.to_string(),
            })?;

        if !is_valid_github_token(&token) {
            tracing::warn!(organization, "GitHub token does not carry a known token prefix");
        }

        Ok(OrganizationCredentials { token })
    }
}

#[async_trait]
impl OrganizationCredentialsProvider for EnvCredentialsProvider {
    async fn get(&self, organization: &str) -> FactoryResult<OrganizationCredentials> {
        Self::lookup(organization, |name| std::env::var(name).ok())
    }
}

/// Fixed organization → token map.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialsProvider {
    tokens: HashMap<String, String>,
}

impl StaticCredentialsProvider {
    pub fn with_token(mut self, organization: &str, token: &str) -> Self {
        self.tokens.insert(organization.to_string(), token.to_string());
        self
    }
}

#[async_trait]
impl OrganizationCredentialsProvider for StaticCredentialsProvider {
    async fn get(&self, organization: &str) -> FactoryResult<OrganizationCredentials> {
        self.tokens
            .get(organization)
            .map(|token| OrganizationCredentials {
                token: token.clone(),
            })
            .ok_or_else(|| FactoryError::MissingCredentials {
                organization: organization.to_string(),
            })
    }
}
