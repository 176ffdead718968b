use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{blocking, body, parse_id, ApiError, AppState, Caller};
use crate::error::QueueError;
use crate::scheduler::batch::ProposalOutcome;
use crate::scheduler::{BatchProposal, BatchRequest, RunReport};

#[derive(Debug, Default, Deserialize)]
pub(super) struct BatchQuery {
    #[serde(default)]
    jobs: bool,
}

/// Operators see every proposal, everyone else only their own.
pub(super) async fn list_batches(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BatchProposal>>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let batches = state.batches.clone();
    let listed = blocking(move || {
        let origin = (!caller.operator).then_some(caller.uid.as_str());
        batches.list(origin)
    })
    .await?;
    Ok(Json(listed))
}

/// `GET /batch/:id?jobs=true` replaces the job ids with the job documents.
pub(super) async fn get_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<BatchQuery>,
) -> Result<Json<Value>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let id = parse_id(&id)?;
    let batches = state.batches.clone();
    let oracle = state.oracle.clone();

    let document = blocking(move || {
        if !query.jobs {
            let batch = batches.get(id)?;
            batch.check_owner(oracle.as_ref(), &caller.uid)?;
            return Ok(serde_json::to_value(batch)?);
        }

        let (batch, jobs) = batches.get_with_jobs(id)?;
        batch.check_owner(oracle.as_ref(), &caller.uid)?;
        let mut document = serde_json::to_value(batch)?;
        document["jobs"] = serde_json::to_value(jobs)?;
        Ok(document)
    })
    .await?;
    Ok(Json(document))
}

pub(super) async fn propose(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<ProposalOutcome>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let request = body(payload)?;
    let batches = state.batches.clone();
    Ok(Json(
        blocking(move || batches.propose(&caller.uid, request)).await?,
    ))
}

pub(super) async fn run_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RunReport>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let id = parse_id(&id)?;
    let batches = state.batches.clone();
    let oracle = state.oracle.clone();
    let report = blocking(move || {
        batches.get(id)?.check_owner(oracle.as_ref(), &caller.uid)?;
        batches.run(id)
    })
    .await?;
    Ok(Json(report))
}

pub(super) async fn cancel_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let id = parse_id(&id)?;
    let batches = state.batches.clone();
    let oracle = state.oracle.clone();
    let cancelled = blocking(move || {
        batches.get(id)?.check_owner(oracle.as_ref(), &caller.uid)?;
        batches.cancel(id)
    })
    .await?;
    Ok(Json(json!({ "number_cancelled": cancelled })))
}
