//! Invocation history read surface: `GET /invocations?function_id=`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{DaemonError, Result};
use crate::router::AppState;
use crate::types::Invocation;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    function_id: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Invocation>>> {
    if query.function_id.trim().is_empty() {
        return Err(DaemonError::Validation("function_id is required".to_string()));
    }

    let rows = state
        .db
        .list_invocations_for_function(&query.function_id, query.limit)
        .await?;
    Ok(Json(rows))
}
