use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::credentials::EnvCredentialsProvider;
use super::github::GitHubConnector;
use super::notifications::{LogNotifier, NotificationSender, SlackNotifier};
use super::scheduler::ChannelWorkQueue;
use super::stacks::InMemoryStackRegistry;
use crate::config::FactoryConfig;

/// Configuration for the HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl From<&FactoryConfig> for ServerConfig {
    fn from(config: &FactoryConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Build the full application router with request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn notification_sender(config: &FactoryConfig) -> Arc<dyn NotificationSender> {
    match &config.notifications.slack_token {
        Some(token) => Arc::new(SlackNotifier::new(&config.notifications.slack_api_url, token)),
        None => {
            tracing::warn!("no Slack token configured, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    }
}

/// Wire the state against live GitHub with credentials from the
/// environment, and the in-process stack registry and queue.
pub fn build_state(config: &FactoryConfig) -> Arc<AppState> {
    let connector = Arc::new(GitHubConnector::new(
        &config.github.api_url,
        Arc::new(EnvCredentialsProvider),
    ));
    let registry = Arc::new(InMemoryStackRegistry::new());
    let queue = Arc::new(ChannelWorkQueue::new(config.discovery.max_receive_count));
    Arc::new(AppState::new(
        config,
        connector,
        registry.clone(),
        registry,
        notification_sender(config),
        queue,
    ))
}

/// Start the service: HTTP endpoints, the periodic discovery scheduler, and
/// the queue worker. Returns once a shutdown signal has been handled and
/// the background tasks have stopped.
pub async fn start_server(config: &FactoryConfig) -> Result<()> {
    let state = build_state(config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = state.scheduler.clone();
    let organization = state.organization.clone();
    let interval = config.discovery.interval();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run_every(interval, &organization, scheduler_shutdown)
            .await;
    });

    let worker = state.worker.clone();
    let queue = state.queue.clone();
    let batch_size = config.discovery.batch_size;
    let worker_task = tokio::spawn(async move {
        worker.run(queue, batch_size, shutdown_rx).await;
    });

    let server_config = ServerConfig::from(config);
    let addr = server_config.address();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(address = %addr, organization = %config.github.organization, "pipeline factory listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    let _ = shutdown_tx.send(true);
    for (name, task) in [("scheduler", scheduler_task), ("worker", worker_task)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "background task panicked");
        }
    }

    tracing::info!("pipeline factory stopped");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
