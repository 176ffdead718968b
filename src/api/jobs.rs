use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::api::{blocking, body, parse_id, ApiError, AppState, Caller};
use crate::error::QueueError;
use crate::scheduler::{Job, JobPatch, JobRequest, Origin, QueueStatistics};

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Job>>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let queue = state.queue.clone();
    Ok(Json(blocking(move || queue.list()).await?))
}

pub(super) async fn add_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let mut request = body(payload)?;
    if !caller.operator {
        request.now = false;
        request.check_access(state.oracle.as_ref(), &caller.uid)?;
    }
    let queue = state.queue.clone();
    let job = blocking(move || queue.create_job(request, Origin::user(&caller.uid))).await?;
    Ok(Json(json!({ "_id": job.id })))
}

pub(super) async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QueueStatistics>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let queue = state.queue.clone();
    Ok(Json(blocking(move || queue.statistics()).await?))
}

/// `GET /jobs/next?tags=a&tags=b`
pub(super) async fn next_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Job>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let tags: Vec<String> = params
        .into_iter()
        .filter(|(key, _)| key == "tags")
        .map(|(_, value)| value)
        .collect();
    let queue = state.queue.clone();
    match blocking(move || queue.claim(&tags)).await? {
        Some(job) => Ok(Json(job)),
        None => Err(QueueError::Validation("No jobs to process".to_string()).into()),
    }
}

pub(super) async fn reap_orphans(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let queue = state.queue.clone();
    let orphaned = blocking(move || queue.scan_for_orphans()).await?;
    Ok(Json(json!({ "orphaned": orphaned })))
}

pub(super) async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let id = parse_id(&id)?;
    let queue = state.queue.clone();
    Ok(Json(blocking(move || queue.get(id)).await?))
}

/// Operators may send any valid patch. The job's origin may only cancel it.
pub(super) async fn update_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<JobPatch>, JsonRejection>,
) -> Result<Json<Job>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let id = parse_id(&id)?;
    let patch = body(payload)?;

    let queue = state.queue.clone();
    let job = blocking(move || {
        if !caller.operator {
            let job = queue.get(id)?;
            if !job.origin.is_owned_by(&caller.uid) {
                return Err(QueueError::Permission(format!(
                    "user {} does not own job {}",
                    caller.uid, id
                )));
            }
            if !patch.is_cancel_only() {
                return Err(QueueError::Permission(
                    "job owners may only cancel their jobs".to_string(),
                ));
            }
        }
        queue.mutate(id, &patch)
    })
    .await?;
    Ok(Json(job))
}

pub(super) async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let id = parse_id(&id)?;
    let queue = state.queue.clone();
    let document = blocking(move || queue.job_config(id)).await?;
    let encoded = serde_json::to_string_pretty(&document).map_err(QueueError::from)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"config.json\""),
        ],
        encoded,
    ))
}

/// Retries bypass the attempt ceiling; callers still need access to the
/// job's inputs and destination.
pub(super) async fn retry_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let id = parse_id(&id)?;
    let queue = state.queue.clone();
    let oracle = state.oracle.clone();
    let new_id = blocking(move || {
        if !caller.operator {
            queue.get(id)?.check_access(oracle.as_ref(), &caller.uid)?;
        }
        queue.retry(id, true)
    })
    .await?;
    Ok(Json(json!({ "_id": new_id })))
}
