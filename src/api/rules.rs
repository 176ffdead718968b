use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::api::{blocking, body, ApiError, AppState, Caller};
use crate::store::Rule;

pub(super) async fn get_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Rule>>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let store = state.store.clone();
    Ok(Json(blocking(move || store.rules()).await?))
}

/// Replaces the whole list; the body is the new list of rule objects.
pub(super) async fn replace_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Vec<Rule>>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    Caller::from_headers(&state, &headers)?.require_operator()?;
    let rules = body(payload)?;
    let count = rules.len();
    let store = state.store.clone();
    blocking(move || store.replace_rules(&rules)).await?;
    tracing::info!(count, "Rules replaced");
    Ok(Json(json!({ "rules": count })))
}
