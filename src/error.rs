// ──────────────────────────────────────────────────────────────
//  adbridge — Gateway Errors
//  Every handler failure funnels through GatewayError so the
//  caller always gets `{"error": ...}` with the right status.
// ──────────────────────────────────────────────────────────────

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::graph::GraphError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller sent an incomplete or malformed request.
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid X-API-Key")]
    Unauthorized,

    /// Server-side credentials or settings are absent.
    #[error("{0}")]
    NotConfigured(String),

    /// The Graph API answered with an error payload; relayed as-is.
    #[error("remote API returned {status}")]
    Remote { status: u16, body: Value },

    /// The Graph API could not be reached or its answer could not be read.
    #[error("remote API request failed: {0}")]
    Upstream(String),
}

impl GatewayError {
    pub fn missing(fields: &str) -> Self {
        GatewayError::BadRequest(format!("{} required", fields))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Remote { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// The value placed under `"error"` in the response body.
    pub fn payload(&self) -> Value {
        match self {
            GatewayError::Remote { body, .. } => body.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

impl From<GraphError> for GatewayError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NotConfigured(what) => {
                GatewayError::NotConfigured(format!("server misconfigured: {} not set", what))
            }
            GraphError::Remote { status, body } => GatewayError::Remote { status, body },
            GraphError::Transport(e) => GatewayError::Upstream(e.to_string()),
            GraphError::Decode(msg) => GatewayError::Upstream(msg),
            invalid @ GraphError::InvalidNode(_) => GatewayError::BadRequest(invalid.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.payload() }))).into_response()
    }
}
