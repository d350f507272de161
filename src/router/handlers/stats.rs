//! `GET /api/stats` — owner-scoped invocation aggregate, bearer-gated via
//! `auth`.

use std::sync::Arc;

use axum::extract::State;
use axum::Extension;
use axum::Json;

use crate::auth::OwnerClaims;
use crate::database::InvocationAggregate;
use crate::error::Result;
use crate::router::AppState;

/// Scoped strictly to the verified token's subject — the caller has no way
/// to request another owner's aggregate.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<OwnerClaims>,
) -> Result<Json<InvocationAggregate>> {
    let aggregate = state.db.aggregate_for_owner(&claims.sub).await?;
    Ok(Json(aggregate))
}
