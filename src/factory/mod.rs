//! Pipeline factory: repository discovery, per-branch pipeline lifecycle and
//! pipeline notifications.
//!
//! ## Module Map
//!
//! ```text
//!  timer / POST /api/discovery
//!        │
//!        v
//!  scheduler.rs  (DiscoveryScheduler, ChannelWorkQueue)
//!        │  one DiscoveryJob per subscribed repository
//!        v
//!  worker.rs     (DiscoveryWorker)
//!        │  explorer.rs      RepositoryExplorer::build_configuration()
//!        │  build_config.rs  new / obsolete branch sets
//!        v
//!  coordinator.rs (PipelineCoordinator) ──> stacks.rs (StackRegistry)
//!
//!  POST /api/branches/{created,deleted} ──> branches.rs ──> stacks.rs
//!  POST /api/events ──> notifications/ ──> Slack
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | Shared types: `Repository`, `Branch`, `StackInformation` |
//! | `settings`    | `pipeline-factory.settings` parsing and branch policy   |
//! | `github`      | `SourceControl` trait and the GitHub REST client        |
//! | `credentials` | Per-organization GitHub tokens                          |
//! | `api`         | HTTP handlers and `AppState`                            |
//! | `server`      | Router, wiring and graceful shutdown                    |

pub mod api;
pub mod branches;
pub mod build_config;
pub mod coordinator;
pub mod credentials;
pub mod explorer;
pub mod github;
pub mod models;
pub mod notifications;
pub mod scheduler;
pub mod server;
pub mod settings;
pub mod stacks;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
