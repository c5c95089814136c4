use axum::{extract::State, Json};
use serde_json::json;

use crate::error::ApiResult;
use crate::routes::AppState;

/// GET /api/scriptflow/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let count = *state.open_channels.lock().unwrap();
    Ok(Json(json!({ "WebSocketsCount": count })))
}
