// ──────────────────────────────────────────────────────────────
//  adbridge — HTTP Gateway
//  Receives dashboard requests, checks the shared key, injects
//  the Graph credentials server-side and relays the answer.
// ──────────────────────────────────────────────────────────────

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AdbridgeConfig;
use crate::dashboard;
use crate::error::GatewayError;
use crate::graph::{self, GraphClient, GraphError, InsightsQuery};
use crate::middleware::{auth_middleware, correlation_middleware, logging_middleware};
use crate::money;
use crate::simulator::{
    self, Proposal, SimulationReport, SimulationRequest, BUDGET_CHANGE, STATUS_CHANGE,
};

const DEFAULT_LEVEL: &str = "campaign";
const DEFAULT_FIELDS: &str = "campaign_name,spend,impressions,clicks,ctr,cpc";

// ── State ──────────────────────────────────────────────────────

/// Read-only after startup; shared across handlers via Arc.
pub struct GatewayState {
    pub config: AdbridgeConfig,
    pub graph: GraphClient,
}

impl GatewayState {
    pub fn new(config: AdbridgeConfig) -> Result<Self, GraphError> {
        let graph = GraphClient::new(&config.graph)?;
        Ok(Self { config, graph })
    }
}

// ── Public Interface ───────────────────────────────────────────

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(dashboard::handle_dashboard))
        .route("/health", get(handle_health))
        .route("/api/health", get(handle_health))
        .route("/api/insights", post(handle_insights))
        .route("/api/adset_budget", post(handle_adset_budget))
        .route("/api/ad_status", post(handle_ad_status))
        .route("/api/simulate", post(handle_simulate))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(axum::middleware::from_fn(logging_middleware))
        .layer(axum::middleware::from_fn(correlation_middleware))
        .with_state(state)
}

/// Serve on an already-bound listener until the process stops.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<GatewayState>) -> std::io::Result<()> {
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await
}

/// Bind the configured address and run the gateway.
pub async fn start_gateway(config: AdbridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.server.bind_addr();
    if !matches!(config.server.listen_addr.as_str(), "127.0.0.1" | "localhost" | "::1") {
        warn!(addr = %addr, "Gateway is listening on a non-loopback address");
    }
    if config.auth.api_key.is_none() {
        warn!("No API key configured; every /api call except health will return 500");
    }

    let state = Arc::new(GatewayState::new(config)?);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("adbridge gateway listening on {}", addr);

    serve(listener, state).await?;
    Ok(())
}

// ── Extractor ──────────────────────────────────────────────────

/// `Json<T>` whose rejections come back as 400 `{"error": ...}`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(GatewayError::BadRequest(rejection_message(rejection))),
        }
    }
}

fn rejection_message(rejection: JsonRejection) -> String {
    format!("invalid JSON body: {}", rejection.body_text())
}

// ── Field helpers ──────────────────────────────────────────────

/// Non-empty string, or an integer rendered as string (Graph ids are numeric).
fn id_field(v: &Option<Value>) -> Option<String> {
    v.as_ref().and_then(simulator::value_id)
}

/// Target ids become a URL path segment; only bare Graph node ids pass.
fn node_id(field: &str, id: &str) -> Result<(), GatewayError> {
    if graph::is_node_id(id) {
        Ok(())
    } else {
        Err(GatewayError::BadRequest(format!(
            "{} must be a plain Graph id (letters, digits, underscore)",
            field
        )))
    }
}

/// A finite number, or a string that parses as one.
fn number_field(v: &Option<Value>) -> Option<f64> {
    v.as_ref().and_then(simulator::value_number)
}

/// Comma list from either `"a,b"` or `["a", "b"]`.
fn list_field(v: &Option<Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(|i| i.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(",");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn text_field(v: &Option<String>) -> Option<String> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

// ── Route Handlers ─────────────────────────────────────────────

/// GET /api/health
pub async fn handle_health() -> impl IntoResponse {
    let body = json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (StatusCode::OK, Json(body))
}

#[derive(Debug, Deserialize)]
pub struct InsightsRequest {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub time_increment: Option<Value>,
    #[serde(default)]
    pub breakdowns: Option<Value>,
    #[serde(default)]
    pub fields: Option<Value>,
}

impl InsightsRequest {
    pub fn into_query(self) -> Result<InsightsQuery, GatewayError> {
        let (since, until) = match (text_field(&self.since), text_field(&self.until)) {
            (Some(s), Some(u)) => (s, u),
            _ => return Err(GatewayError::missing("since and until")),
        };
        let time_increment = match self.time_increment {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };
        Ok(InsightsQuery {
            level: text_field(&self.level).unwrap_or_else(|| DEFAULT_LEVEL.to_string()),
            since,
            until,
            time_increment,
            breakdowns: list_field(&self.breakdowns),
            fields: list_field(&self.fields).unwrap_or_else(|| DEFAULT_FIELDS.to_string()),
        })
    }
}

/// POST /api/insights
pub async fn handle_insights(
    State(state): State<Arc<GatewayState>>,
    ApiJson(req): ApiJson<InsightsRequest>,
) -> Result<Json<Value>, GatewayError> {
    let query = req.into_query()?;
    let data = state.graph.insights(&query).await?;
    Ok(Json(data))
}

#[derive(Debug, Deserialize)]
pub struct AdsetBudgetRequest {
    #[serde(default)]
    pub adset_id: Option<Value>,
    #[serde(default)]
    pub daily_budget_eur: Option<Value>,
}

/// POST /api/adset_budget
pub async fn handle_adset_budget(
    State(state): State<Arc<GatewayState>>,
    ApiJson(req): ApiJson<AdsetBudgetRequest>,
) -> Result<Json<Value>, GatewayError> {
    let (adset_id, eur) = match (id_field(&req.adset_id), number_field(&req.daily_budget_eur)) {
        (Some(id), Some(eur)) => (id, eur),
        _ => return Err(GatewayError::missing("adset_id and daily_budget_eur")),
    };
    node_id("adset_id", &adset_id)?;
    let cents = money::to_cents(eur)?;

    let updated = state.graph.update_adset_budget(&adset_id, cents).await?;
    info!(adset_id = %adset_id, cents, "Ad set budget updated");

    Ok(Json(json!({
        "updated": updated,
        "meta": {
            "adset_id": adset_id,
            "daily_budget_eur": eur,
            "daily_budget_cents": cents,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct AdStatusRequest {
    #[serde(default)]
    pub ad_id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

/// POST /api/ad_status
pub async fn handle_ad_status(
    State(state): State<Arc<GatewayState>>,
    ApiJson(req): ApiJson<AdStatusRequest>,
) -> Result<Json<Value>, GatewayError> {
    let (ad_id, status) = match (id_field(&req.ad_id), text_field(&req.status)) {
        (Some(id), Some(s)) => (id, s.to_uppercase()),
        _ => return Err(GatewayError::missing("ad_id and status")),
    };
    node_id("ad_id", &ad_id)?;

    let updated = state.graph.update_ad_status(&ad_id, &status).await?;
    info!(ad_id = %ad_id, status = %status, "Ad status updated");

    Ok(Json(json!({
        "updated": updated,
        "meta": { "ad_id": ad_id },
        "new_status": status,
    })))
}

/// POST /api/simulate
pub async fn handle_simulate(
    State(state): State<Arc<GatewayState>>,
    ApiJson(req): ApiJson<SimulationRequest>,
) -> Result<Json<SimulationReport>, GatewayError> {
    let mut report = simulator::simulate(&state.config.policy, &req)
        .ok_or_else(|| GatewayError::missing("proposals or action"))?;

    if req.apply {
        if let Some((_, proposals)) = req.to_proposals() {
            // All-or-nothing: one bad target refuses the batch before anything is sent.
            proposals.iter().try_for_each(check_targets)?;
            for (decision, proposal) in report.results.iter_mut().zip(proposals.iter()) {
                if !decision.approved {
                    continue;
                }
                match apply_proposal(&state.graph, proposal).await {
                    Some(Ok(remote)) => decision.applied = Some(remote),
                    Some(Err(err)) => decision.apply_error = Some(err.payload()),
                    None => {}
                }
            }
        }
    }

    let approved = report.results.iter().filter(|d| d.approved).count();
    info!(
        proposals = report.results.len(),
        approved,
        apply = req.apply,
        "Simulation evaluated"
    );

    Ok(Json(report))
}

fn check_targets(proposal: &Proposal) -> Result<(), GatewayError> {
    let targets = [("adset_id", &proposal.adset_id), ("ad_id", &proposal.ad_id)];
    for (field, id) in targets {
        if let Some(id) = id.as_deref().filter(|id| !id.is_empty()) {
            node_id(field, id).map_err(|_| {
                GatewayError::BadRequest(format!(
                    "proposal {}: {} must be a plain Graph id (letters, digits, underscore)",
                    proposal.id, field
                ))
            })?;
        }
    }
    Ok(())
}

/// Forward one approved proposal. `None` when it names no target.
async fn apply_proposal(
    graph: &GraphClient,
    proposal: &Proposal,
) -> Option<Result<Value, GatewayError>> {
    match proposal.kind.as_str() {
        BUDGET_CHANGE => {
            let adset_id = proposal.adset_id.as_deref().filter(|id| !id.is_empty())?;
            let result = match proposal.new_daily_budget_eur {
                Some(eur) => match money::to_cents(eur) {
                    Ok(cents) => graph.update_adset_budget(adset_id, cents).await.map_err(Into::into),
                    Err(e) => Err(e),
                },
                None => Err(GatewayError::missing("new_daily_budget_eur")),
            };
            Some(result)
        }
        STATUS_CHANGE => {
            let ad_id = proposal.ad_id.as_deref().filter(|id| !id.is_empty())?;
            let status = proposal.new_status.as_deref()?;
            Some(graph.update_ad_status(ad_id, status).await.map_err(Into::into))
        }
        _ => None,
    }
}
