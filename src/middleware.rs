// ──────────────────────────────────────────────────────────────
//  adbridge — HTTP Middleware
//  Correlation ids, request logging, and the shared-secret gate
//  in front of every /api route except health.
// ──────────────────────────────────────────────────────────────

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::GatewayState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

// ── Auth ───────────────────────────────────────────────────────

/// Paths reachable without the shared secret.
pub fn is_public_path(path: &str) -> bool {
    matches!(path, "/" | "/health" | "/api/health")
}

/// Check the `X-API-Key` header against the configured secret.
pub fn authorize(headers: &HeaderMap, expected: Option<&str>) -> Result<(), GatewayError> {
    let expected = match expected.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => {
            return Err(GatewayError::NotConfigured(
                "server misconfigured: API key not set".to_string(),
            ))
        }
    };

    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if constant_time_eq(provided, expected) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_public_path(req.uri().path()) {
        return next.run(req).await;
    }
    match authorize(req.headers(), state.config.auth.api_key.as_deref()) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

// ── Correlation ────────────────────────────────────────────────

pub async fn correlation_middleware(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(CorrelationId(request_id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// ── Logging ────────────────────────────────────────────────────

pub async fn logging_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = req
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;

    if is_public_path(&path) {
        debug!(request_id = %request_id, method = %method, path = %path, status, latency_ms, "request");
    } else if response.status().is_success() {
        info!(request_id = %request_id, method = %method, path = %path, status, latency_ms, "request");
    } else {
        warn!(request_id = %request_id, method = %method, path = %path, status, latency_ms, "request failed");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(key: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        h
    }

    #[test]
    fn test_authorize_match() {
        assert!(authorize(&headers_with("k1"), Some("k1")).is_ok());
    }

    #[test]
    fn test_authorize_mismatch_or_missing() {
        assert!(matches!(authorize(&headers_with("nope"), Some("k1")), Err(GatewayError::Unauthorized)));
        assert!(matches!(authorize(&HeaderMap::new(), Some("k1")), Err(GatewayError::Unauthorized)));
    }

    #[test]
    fn test_authorize_unconfigured() {
        assert!(matches!(authorize(&headers_with("k1"), None), Err(GatewayError::NotConfigured(_))));
        assert!(matches!(authorize(&headers_with(""), Some("  ")), Err(GatewayError::NotConfigured(_))));
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/api/health"));
        assert!(is_public_path("/health"));
        assert!(is_public_path("/"));
        assert!(!is_public_path("/api/insights"));
        assert!(!is_public_path("/api/health/deep"));
    }
}
