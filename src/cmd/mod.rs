//! CLI command implementations.
//!
//! | Module      | Commands handled     |
//! |-------------|----------------------|
//! | `serve`     | `Serve`              |
//! | `discover`  | `Discover`           |
//! | `reconcile` | `Reconcile`          |
//! | `settings`  | `CheckSettings`      |

pub mod discover;
pub mod reconcile;
pub mod serve;
pub mod settings;

pub use discover::cmd_discover;
pub use reconcile::cmd_reconcile;
pub use serve::cmd_serve;
pub use settings::cmd_check_settings;

use anyhow::Result;
use pipeline_factory::config::FactoryConfig;

use crate::Cli;

/// Layer file, environment and global flags, then validate.
pub fn load_config(cli: &Cli) -> Result<FactoryConfig> {
    let mut config = FactoryConfig::load_or_default(cli.config.as_deref())?.with_env()?;
    if let Some(org) = &cli.organization {
        config.github.organization = org.clone();
    }
    config.validate()?;
    Ok(config)
}
