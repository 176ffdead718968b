use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::access::Role;
use crate::api::{body, ApiError, AppState, Caller};
use crate::error::QueueError;
use crate::gears::GearManifest;
use crate::identifiers::ContainerReference;
use crate::scheduler::matcher;

pub(super) async fn list_gears(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<GearManifest>>, ApiError> {
    Caller::from_headers(&state, &headers)?;
    Ok(Json(state.gears.list()))
}

pub(super) async fn get_gear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<GearManifest>, ApiError> {
    Caller::from_headers(&state, &headers)?;
    Ok(Json(state.gears.get(&name)?.manifest().clone()))
}

/// The path names the gear; a different `name` in the body is overridden.
pub(super) async fn upsert_gear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    payload: Result<Json<GearManifest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let mut manifest = body(payload)?;
    manifest.name = name;
    let gear = state.gears.upsert(manifest)?;
    Ok(Json(json!({ "name": gear.name() })))
}

pub(super) async fn delete_gear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    state.gears.remove(&name)?;
    Ok(Json(json!({ "deleted": 1 })))
}

pub(super) async fn invocation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Caller::from_headers(&state, &headers)?;
    Ok(Json(state.gears.get(&name)?.invocation_schema()))
}

pub(super) async fn suggest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((name, container_type, container_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let caller = Caller::from_headers(&state, &headers)?;
    let reference = ContainerReference::new(container_type, container_id)?;
    reference.check_access(state.oracle.as_ref(), &caller.uid, Role::ReadOnly)?;

    let gear = state.gears.get(&name)?;
    let container = state
        .containers
        .get(&reference)
        .ok_or_else(|| QueueError::ContainerNotFound(reference.to_string()))?;
    let inputs = matcher::suggest(&gear, &container);
    Ok(Json(json!({ "container": reference, "inputs": inputs })))
}
