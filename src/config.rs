//! Service configuration.
//!
//! Read from `pipeline-factory.toml` (path overridable with `--config`), then
//! layered: defaults → file → environment → CLI flags. A `.env` file is
//! loaded into the environment before the environment layer is applied.
//!
//! ```toml
//! [github]
//! organization = "acme"
//! api_url = "https://api.github.com"
//!
//! [discovery]
//! subscription = "prefix:stage"   # all | prefix:<p> | topic:<t>
//! interval_secs = 3600
//! max_receive_count = 3
//!
//! [pipelines]
//! allow_deletion = true
//! artifacts_bucket = "acme-pipeline-artifacts"
//!
//! [notifications]
//! slack_api_url = "https://slack.com/api"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::{FactoryError, FactoryResult};
use crate::factory::explorer::SubscriptionFilter;
use crate::factory::github::DEFAULT_GITHUB_API_URL;
use crate::factory::notifications::slack::DEFAULT_SLACK_API_URL;
use crate::factory::scheduler::DEFAULT_MAX_RECEIVE_COUNT;
use crate::factory::worker::DEFAULT_BATCH_SIZE;

pub const DEFAULT_CONFIG_FILE: &str = "pipeline-factory.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default)]
    pub organization: String,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            organization: String::new(),
            api_url: default_github_api_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySection {
    #[serde(default)]
    pub subscription: SubscriptionFilter,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Deliveries of a failing job before it is dropped.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_max_receive_count() -> u32 {
    DEFAULT_MAX_RECEIVE_COUNT
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            subscription: SubscriptionFilter::default(),
            interval_secs: default_interval_secs(),
            max_receive_count: default_max_receive_count(),
            batch_size: default_batch_size(),
        }
    }
}

impl DiscoverySection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinesSection {
    /// When false, obsolete pipelines are reported and retained.
    #[serde(default = "default_true")]
    pub allow_deletion: bool,
    #[serde(default)]
    pub artifacts_bucket: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for PipelinesSection {
    fn default() -> Self {
        Self {
            allow_deletion: true,
            artifacts_bucket: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsSection {
    #[serde(default = "default_slack_api_url")]
    pub slack_api_url: String,
    /// Without a token notifications are logged instead of sent.
    #[serde(default, skip_serializing)]
    pub slack_token: Option<String>,
}

fn default_slack_api_url() -> String {
    DEFAULT_SLACK_API_URL.to_string()
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            slack_api_url: default_slack_api_url(),
            slack_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub pipelines: PipelinesSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl FactoryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pipeline-factory.toml")
    }

    /// Explicit paths must exist; the default path may be absent.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    pub fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(org) = var("ORGANIZATION_NAME") {
            self.github.organization = org;
        }
        if let Some(url) = var("GITHUB_API_URL") {
            self.github.api_url = url;
        }
        if let Some(filter) = var("SUBSCRIPTION_FILTER") {
            self.discovery.subscription = filter.parse().context("Invalid SUBSCRIPTION_FILTER")?;
        }
        if let Some(secs) = var("DISCOVERY_INTERVAL_SECS") {
            self.discovery.interval_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid DISCOVERY_INTERVAL_SECS: {}", secs))?;
        }
        if let Some(allow) = var("ALLOW_PIPELINE_DELETION") {
            self.pipelines.allow_deletion = parse_bool(&allow)
                .with_context(|| format!("Invalid ALLOW_PIPELINE_DELETION: {}", allow))?;
        }
        if let Some(bucket) = var("ARTIFACTS_BUCKET") {
            self.pipelines.artifacts_bucket = Some(bucket);
        }
        if let Some(token) = var("SLACK_TOKEN") {
            self.notifications.slack_token = Some(token);
        }
        if let Some(url) = var("SLACK_API_URL") {
            self.notifications.slack_api_url = url;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT: {}", port))?;
        }
        Ok(self)
    }

    /// Preconditions checked before any work starts.
    pub fn validate(&self) -> FactoryResult<()> {
        if self.github.organization.trim().is_empty() {
            return Err(FactoryError::Config(
                "GitHub organization is not set (github.organization or ORGANIZATION_NAME)".into(),
            ));
        }
        if self.discovery.interval_secs == 0 {
            return Err(FactoryError::Config("discovery.interval_secs must be greater than zero".into()));
        }
        if self.discovery.batch_size == 0 {
            return Err(FactoryError::Config("discovery.batch_size must be greater than zero".into()));
        }
        if self.discovery.max_receive_count == 0 {
            return Err(FactoryError::Config(
                "discovery.max_receive_count must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
