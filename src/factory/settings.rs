//! Per-repository settings file: parsing, monitoring policy and resolution.
//!
//! The file lives at [`SETTINGS_FILE_PATH`] in the repository root. It is read
//! from the default branch for reconciliation and from the event's branch for
//! notification routing. An absent file means all defaults; a present but
//! unparsable file is a data error and must never degrade to defaults.

use std::sync::Arc;

use glob::{MatchOptions, Pattern};

use super::github::SourceControl;
use super::models::{NotificationTarget, PipelineState, SettingsOverrides};
use crate::errors::{FactoryError, FactoryResult};

pub const SETTINGS_FILE_PATH: &str = "pipeline-factory.settings";

const CASE_INSENSITIVE: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Case-insensitive branch match. Entries containing glob metacharacters are
/// treated as patterns; git forbids those characters in ref names, so a plain
/// branch name never changes meaning.
pub fn branch_matches(entry: &str, branch: &str) -> bool {
    if entry.eq_ignore_ascii_case(branch) {
        return true;
    }
    if !entry.contains(['*', '?', '[']) {
        return false;
    }
    Pattern::new(entry)
        .map(|p| p.matches_with(branch, CASE_INSENSITIVE))
        .unwrap_or(false)
}

impl SettingsOverrides {
    /// Parse settings file content.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Whether `branch` should have a pipeline. The default branch always does.
    pub fn monitors_branch(&self, branch: &str, default_branch: &str) -> bool {
        if branch.eq_ignore_ascii_case(default_branch) {
            return true;
        }
        self.monitored_branches
            .iter()
            .flatten()
            .any(|entry| branch_matches(entry, branch))
    }

    /// True when the repository explicitly opts out of factory pipelines.
    pub fn opted_out(&self) -> bool {
        self.deploy_via_github_actions.unwrap_or(false)
    }

    /// Targets of rules firing on `state` for `branch`, deduplicated by
    /// (channel id, channel type) in first-seen order.
    pub fn notification_targets(&self, branch: &str, state: PipelineState) -> Vec<NotificationTarget> {
        let mut targets: Vec<NotificationTarget> = Vec::new();
        for rule in self.notifications.iter().flatten() {
            if rule.event != state {
                continue;
            }
            if !rule.branches.iter().any(|b| branch_matches(b, branch)) {
                continue;
            }
            let target = rule.target();
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }
}

/// Fetches and parses the settings file through the source-control gateway.
#[derive(Clone)]
pub struct SettingsResolver {
    source: Arc<dyn SourceControl>,
}

impl SettingsResolver {
    pub fn new(source: Arc<dyn SourceControl>) -> Self {
        Self { source }
    }

    /// `Ok(None)` when the file does not exist on `branch`.
    pub async fn fetch(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> FactoryResult<Option<SettingsOverrides>> {
        let content = self
            .source
            .fetch_file_content(owner, repository, branch, SETTINGS_FILE_PATH)
            .await?;

        let Some(content) = content else {
            tracing::debug!(owner, repository, branch, "no settings file, using defaults");
            return Ok(None);
        };

        SettingsOverrides::parse(&content)
            .map(Some)
            .map_err(|source| FactoryError::MalformedSettings {
                owner: owner.to_string(),
                repository: repository.to_string(),
                branch: branch.to_string(),
                source,
            })
    }

    /// Settings in effect on `branch`; defaults when the file is absent.
    pub async fn resolve(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> FactoryResult<SettingsOverrides> {
        Ok(self.fetch(owner, repository, branch).await?.unwrap_or_default())
    }
}
