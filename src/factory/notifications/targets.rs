use std::sync::Arc;

use crate::errors::FactoryResult;
use crate::factory::github::SourceControl;
use crate::factory::models::{NotificationTarget, PipelineState};
use crate::factory::settings::SettingsResolver;

/// Resolves notification targets from the settings file of the branch the
/// event happened on.
pub struct NotificationTargetsResolver {
    settings: SettingsResolver,
}

impl NotificationTargetsResolver {
    pub fn new(source: Arc<dyn SourceControl>) -> Self {
        Self {
            settings: SettingsResolver::new(source),
        }
    }

    /// Empty when no settings file exists or no rule matches.
    pub async fn resolve(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        state: PipelineState,
    ) -> FactoryResult<Vec<NotificationTarget>> {
        let settings = self.settings.resolve(owner, repository, branch).await?;
        Ok(settings.notification_targets(branch, state))
    }
}
