//! HTTP surface. Handlers resolve the caller, run the permission check for
//! the route, then forward to the queue, the batch engine or the gear
//! registry. They never write job or proposal records themselves.
//!
//! Store-backed calls run on the blocking pool through [`blocking`], so a
//! busy SQLite file never stalls the async workers.

mod batch;
mod gears;
mod jobs;
mod rules;

use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::access::AccessOracle;
use crate::containers::ContainerStore;
use crate::error::QueueError;
use crate::gears::GearRegistry;
use crate::scheduler::{BatchEngine, Queue};
use crate::store::Store;

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<Queue>,
    pub batches: Arc<BatchEngine>,
    pub gears: Arc<dyn GearRegistry>,
    pub containers: Arc<dyn ContainerStore>,
    pub oracle: Arc<dyn AccessOracle>,
    pub store: Arc<dyn Store>,
}

/// The identity a request acts as.
#[derive(Debug, Clone)]
pub struct Caller {
    pub uid: String,
    pub operator: bool,
}

impl Caller {
    fn from_headers(state: &AppState, headers: &HeaderMap) -> Result<Self, ApiError> {
        let uid = headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| QueueError::Permission("login required".to_string()))?;
        Ok(Self {
            operator: state.oracle.is_operator(uid),
            uid: uid.to_string(),
        })
    }

    fn require_operator(&self) -> Result<(), ApiError> {
        if self.operator {
            Ok(())
        } else {
            Err(QueueError::Permission(format!("user {} is not an operator", self.uid)).into())
        }
    }
}

/// A [`QueueError`] rendered as `{"error": message}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub QueueError);

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            QueueError::Permission(_) => StatusCode::FORBIDDEN,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| QueueError::Validation(format!("invalid id: {}", raw)).into())
}

/// Run a store-backed call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QueueError::Internal(format!("storage task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| QueueError::Validation(e.body_text()).into())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/jobs", get(jobs::list_jobs).post(jobs::add_job))
        .route("/jobs/stats", get(jobs::stats))
        .route("/jobs/next", get(jobs::next_job))
        .route("/jobs/reap", post(jobs::reap_orphans))
        .route("/jobs/:id", get(jobs::get_job).put(jobs::update_job))
        .route("/jobs/:id/config", get(jobs::get_config))
        .route("/jobs/:id/retry", post(jobs::retry_job))
        .route("/batch", get(batch::list_batches).post(batch::propose))
        .route("/batch/:id", get(batch::get_batch))
        .route("/batch/:id/run", post(batch::run_batch))
        .route("/batch/:id/cancel", post(batch::cancel_batch))
        .route("/rules", get(rules::get_rules).post(rules::replace_rules))
        .route("/gears", get(gears::list_gears))
        .route(
            "/gears/:name",
            get(gears::get_gear)
                .post(gears::upsert_gear)
                .delete(gears::delete_gear),
        )
        .route("/gears/:name/invocation", get(gears::invocation))
        .route(
            "/gears/:name/suggest/:container_type/:container_id",
            get(gears::suggest),
        )
        .layer(cors)
        .with_state(state)
}
