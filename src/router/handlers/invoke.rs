//! Direct invocation endpoint: `POST /invoke/:function_id`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DaemonError, Result};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub success: bool,
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
    pub invocation_id: String,
}

/// `POST /invoke/:function_id`. A missing body is treated as `{"input": {}}`;
/// public with no authentication — the opaque function id is the only gate.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(function_id): Path<String>,
    body: Option<Json<InvokeRequest>>,
) -> Result<Json<InvokeResponse>> {
    let function = state
        .db
        .get_function(&function_id)
        .await?
        .ok_or_else(|| DaemonError::NotFound(format!("function {function_id} not found")))?;

    let input = body.map(|Json(req)| req.input).unwrap_or_else(|| serde_json::json!({}));

    // Spawned rather than awaited inline: if the client disconnects, axum
    // drops this handler's future, but the spawned task keeps running the
    // container to completion and still writes the Invocation record (§5 —
    // only the response is discarded on client cancellation).
    let engine = state.engine.clone();
    let outcome = tokio::spawn(async move { engine.invoke(&function, input, None).await })
        .await
        .map_err(|e| DaemonError::Internal(format!("invocation task panicked: {e}")))??;

    Ok(Json(InvokeResponse {
        success: outcome.success,
        output: outcome.output,
        error: outcome.error,
        duration_ms: outcome.duration_ms,
        invocation_id: outcome.invocation_id,
    }))
}
