//! Bearer-token verification for the aggregation endpoint (`/api/stats`).
//!
//! The identity provider itself is an external system; this module only
//! consumes its public JWKS endpoint to verify tokens locally.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::DaemonError;
use crate::router::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerClaims {
    /// Subject claim, used as the owner id for aggregation scoping.
    pub sub: String,
    pub exp: i64,
}

/// Caches the identity provider's public key set so the hot path doesn't
/// refetch it on every request.
pub struct JwksCache {
    jwks_url: Option<String>,
    http: reqwest::Client,
    cached: RwLock<Option<JwkSet>>,
}

impl JwksCache {
    pub fn new(jwks_url: Option<String>) -> Self {
        Self {
            jwks_url,
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
        }
    }

    async fn get(&self) -> Result<JwkSet, DaemonError> {
        if let Some(jwks) = self.cached.read().await.clone() {
            return Ok(jwks);
        }

        let url = self
            .jwks_url
            .as_deref()
            .ok_or_else(|| DaemonError::Internal("identity.jwks_url is not configured".to_string()))?;

        let jwks: JwkSet = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DaemonError::Internal(format!("jwks fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| DaemonError::Internal(format!("jwks parse failed: {e}")))?;

        *self.cached.write().await = Some(jwks.clone());
        Ok(jwks)
    }

    pub async fn verify(&self, token: &str) -> Result<OwnerClaims, DaemonError> {
        let header = decode_header(token).map_err(|_| DaemonError::Validation("malformed token".to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| DaemonError::Validation("token missing key id".to_string()))?;

        let jwks = self.get().await?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| DaemonError::Validation("unknown signing key".to_string()))?;

        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| DaemonError::Internal(format!("invalid jwk: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        let data = decode::<OwnerClaims>(token, &decoding_key, &validation)
            .map_err(|_| DaemonError::Validation("token verification failed".to_string()))?;

        Ok(data.claims)
    }
}

/// Axum middleware gating `/api/stats`: requires `Authorization: Bearer
/// <token>` verified against the configured JWKS. The verified subject is
/// stashed as a request extension for the handler to read as `owner_id`.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, DaemonError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| DaemonError::Validation("missing authorization header".to_string()))?;

    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| DaemonError::Validation("expected a bearer token".to_string()))?;

    let claims = state.jwks.verify(token).await.map_err(|e| {
        warn!(error = %e, "bearer token rejected");
        e
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
