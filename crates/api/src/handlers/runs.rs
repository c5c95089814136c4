use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use scriptflow_domain::Run;

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct LatestRunsParams {
    #[serde(rename = "taskIds", default)]
    task_ids: String,
}

/// GET /api/scriptflow/runs/latest?taskIds=a,b,c
///
/// 单条 join-and-max 查询返回每个任务的最近一次运行，
/// 取代前端对每个任务的单独查询。
pub async fn latest_runs(
    State(state): State<AppState>,
    Query(params): Query<LatestRunsParams>,
) -> ApiResult<Json<HashMap<String, Run>>> {
    if params.task_ids.is_empty() {
        return Ok(Json(HashMap::new()));
    }

    let task_ids: Vec<String> = params
        .task_ids
        .split(',')
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .collect();
    if task_ids.is_empty() {
        return Ok(Json(HashMap::new()));
    }

    let runs = state.sf.store().runs.latest_by_tasks(&task_ids).await?;
    let result = runs
        .into_iter()
        .map(|run| (run.task.clone(), run))
        .collect();
    Ok(Json(result))
}

/// POST /api/scriptflow/run/{runId}/kill
pub async fn kill_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .sf
        .kill_run(&run_id)
        .map_err(|e| ApiError::NotFound(e.to_string()))?;
    Ok(Json(json!({"status": "killed", "runId": run_id})))
}
