use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::branches::{BranchEvent, BranchEventHandler, PipelineOperationResult};
use super::coordinator::{PipelineCoordinator, ReconcileReport};
use super::github::SourceControlConnector;
use super::models::DiscoveryJob;
use super::notifications::{
    DispatchOutcome, ExecutionEvent, NotificationDispatcher, NotificationSender, PayloadBuilder,
    PipelineExecutions,
};
use super::scheduler::{ChannelWorkQueue, DiscoveryScheduler, QueuedMessage, ScheduleReport};
use super::stacks::StackRegistry;
use super::worker::DiscoveryWorker;
use crate::config::FactoryConfig;
use crate::errors::FactoryError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub organization: String,
    pub scheduler: Arc<DiscoveryScheduler>,
    pub worker: Arc<DiscoveryWorker>,
    pub queue: Arc<ChannelWorkQueue>,
    pub branches: BranchEventHandler,
    pub notifications: NotificationDispatcher,
}

impl AppState {
    /// Wire every handler from configuration and the injected gateways.
    pub fn new(
        config: &FactoryConfig,
        connector: Arc<dyn SourceControlConnector>,
        stacks: Arc<dyn StackRegistry>,
        executions: Arc<dyn PipelineExecutions>,
        sender: Arc<dyn NotificationSender>,
        queue: Arc<ChannelWorkQueue>,
    ) -> Self {
        let filter = config.discovery.subscription.clone();
        let allow_deletion = config.pipelines.allow_deletion;
        let bucket = config.pipelines.artifacts_bucket.clone();

        let coordinator = PipelineCoordinator::new(stacks.clone(), filter.clone())
            .with_deletion(allow_deletion)
            .with_artifacts_bucket(bucket.clone());

        Self {
            organization: config.github.organization.clone(),
            scheduler: Arc::new(DiscoveryScheduler::new(
                connector.clone(),
                stacks.clone(),
                filter.clone(),
                queue.clone(),
            )),
            worker: Arc::new(DiscoveryWorker::new(connector.clone(), stacks.clone(), filter, coordinator)),
            queue,
            branches: BranchEventHandler::new(connector.clone(), stacks.clone())
                .with_deletion(allow_deletion)
                .with_artifacts_bucket(bucket),
            notifications: NotificationDispatcher::new(connector, PayloadBuilder::new(stacks, executions), sender),
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// A batch of queue records, as handed to a queue-triggered consumer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryBatchRequest {
    pub records: Vec<QueuedMessage>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Partial batch response: only the listed records are redelivered.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryBatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

// ── Error type ────────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Unprocessable(String),
    Internal(String),
}

impl From<FactoryError> for ApiError {
    fn from(err: FactoryError) -> Self {
        match err {
            FactoryError::MalformedSettings { .. } => ApiError::Unprocessable(err.to_string()),
            FactoryError::RepositoryNotFound { .. } => ApiError::NotFound(err.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/branches/created", post(branch_created))
        .route("/api/branches/deleted", post(branch_deleted))
        .route("/api/discovery", post(run_discovery))
        .route("/api/discovery/batch", post(process_discovery_batch))
        .route(
            "/api/repositories/{owner}/{repository}/reconcile",
            post(reconcile_repository),
        )
        .route("/api/events", post(pipeline_event))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn branch_created(
    State(state): State<SharedState>,
    Json(event): Json<BranchEvent>,
) -> Result<Json<PipelineOperationResult>, ApiError> {
    Ok(Json(state.branches.branch_created(&event).await?))
}

async fn branch_deleted(
    State(state): State<SharedState>,
    Json(event): Json<BranchEvent>,
) -> Result<Json<PipelineOperationResult>, ApiError> {
    Ok(Json(state.branches.branch_deleted(&event).await?))
}

async fn run_discovery(State(state): State<SharedState>) -> Result<Json<ScheduleReport>, ApiError> {
    Ok(Json(state.scheduler.run(&state.organization).await?))
}

async fn reconcile_repository(
    State(state): State<SharedState>,
    Path((owner, repository)): Path<(String, String)>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let job = DiscoveryJob {
        name: repository,
        owner,
    };
    Ok(Json(state.worker.process_job(&job).await?))
}

async fn process_discovery_batch(
    State(state): State<SharedState>,
    Json(batch): Json<DiscoveryBatchRequest>,
) -> Json<DiscoveryBatchResponse> {
    let outcome = state.worker.process_batch(&batch.records).await;
    Json(DiscoveryBatchResponse {
        batch_item_failures: outcome
            .failed_message_ids
            .into_iter()
            .map(|item_identifier| BatchItemFailure { item_identifier })
            .collect(),
    })
}

async fn pipeline_event(
    State(state): State<SharedState>,
    Json(event): Json<ExecutionEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome: DispatchOutcome = state.notifications.handle(&event).await?;
    Ok((StatusCode::OK, Json(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::models::{BranchRef, RepositoryDetails};
    use crate::factory::settings::SETTINGS_FILE_PATH;
    use crate::factory::stacks::InMemoryStackRegistry;
    use crate::factory::testing::{FakeConnector, FakeSourceControl, RecordingSender, summary};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn source() -> FakeSourceControl {
        FakeSourceControl::new()
            .with_repository(RepositoryDetails {
                name: "stage-api".into(),
                owner: "acme".into(),
                id: "1".into(),
                default_branch: "main".into(),
                topics: vec![],
                branches: vec![
                    BranchRef {
                        name: "main".into(),
                        commit_sha: "a".into(),
                    },
                    BranchRef {
                        name: "develop".into(),
                        commit_sha: "b".into(),
                    },
                ],
            })
            .with_summary(summary("acme", "legacy-app"))
            .with_file(
                "acme",
                "stage-api",
                "main",
                SETTINGS_FILE_PATH,
                r#"{"monitoredBranches": ["develop"]}"#,
            )
    }

    fn test_app(source: FakeSourceControl) -> (Router, Arc<InMemoryStackRegistry>, Arc<ChannelWorkQueue>) {
        let mut config = FactoryConfig::default();
        config.github.organization = "acme".into();
        let registry = Arc::new(InMemoryStackRegistry::new());
        let queue = Arc::new(ChannelWorkQueue::new(3));
        let state = AppState::new(
            &config,
            Arc::new(FakeConnector::new(source)),
            registry.clone(),
            registry.clone(),
            Arc::new(RecordingSender::default()),
            queue.clone(),
        );
        (api_router().with_state(Arc::new(state)), registry, queue)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _, _) = test_app(source());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_branch_created_monitored() {
        let (app, registry, _) = test_app(source());
        let req = post_json(
            "/api/branches/created",
            serde_json::json!({"owner": "acme", "repository": "stage-api", "branch": "develop"}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["stackId"].is_string());
        assert_eq!(registry.list_stacks().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_branch_created_rejection_is_still_200() {
        let (app, _, _) = test_app(source());
        let req = post_json(
            "/api/branches/created",
            serde_json::json!({"owner": "acme", "repository": "stage-api", "branch": "scratch"}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["message"].as_str().unwrap().contains("not configured"));
        assert!(json.get("stackId").is_none());
    }

    #[tokio::test]
    async fn test_branch_created_unknown_repository_is_404() {
        let (app, _, _) = test_app(source());
        let req = post_json(
            "/api/branches/created",
            serde_json::json!({"owner": "acme", "repository": "gone", "branch": "main"}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_branch_deleted_without_stack() {
        let (app, _, _) = test_app(source());
        let req = post_json(
            "/api/branches/deleted",
            serde_json::json!({"owner": "acme", "repository": "stage-api", "branch": "develop"}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_json(resp).await["message"].as_str().unwrap().starts_with("No matching stack"));
    }

    #[tokio::test]
    async fn test_reconcile_route() {
        let (app, registry, _) = test_app(source());
        let req = post_json("/api/repositories/acme/stage-api/reconcile", serde_json::json!({}));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["created"].as_array().unwrap().len(), 2);
        assert_eq!(registry.list_stacks().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_malformed_settings_is_422() {
        let source = source().with_file("acme", "stage-api", "main", SETTINGS_FILE_PATH, "{nope");
        let (app, _, _) = test_app(source);
        let req = post_json("/api/repositories/acme/stage-api/reconcile", serde_json::json!({}));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_json(resp).await["error"].as_str().unwrap().contains("Malformed settings"));
    }

    #[tokio::test]
    async fn test_discovery_enqueues_subscribed_only() {
        let (app, _, queue) = test_app(source());
        let resp = app.oneshot(post_json("/api/discovery", serde_json::json!({}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["enqueued"].as_array().unwrap().len(), 1);
        assert_eq!(queue.try_receive_batch(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_batch_reports_item_failures() {
        let (app, _, _) = test_app(source());
        let good = QueuedMessage::new(&DiscoveryJob {
            name: "stage-api".into(),
            owner: "acme".into(),
        })
        .unwrap();
        let req = post_json(
            "/api/discovery/batch",
            serde_json::json!({"records": [
                good,
                {"messageId": "bad-1", "body": "not a job"}
            ]}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json, serde_json::json!({"batchItemFailures": [{"itemIdentifier": "bad-1"}]}));
    }

    #[tokio::test]
    async fn test_unrelated_event_is_ignored() {
        let (app, _, _) = test_app(source());
        let req = post_json(
            "/api/events",
            serde_json::json!({"detail-type": "EC2 Instance State-change Notification", "detail": {}}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["outcome"], "ignored");
    }
}
