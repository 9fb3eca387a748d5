// ──────────────────────────────────────────────────────────────
//  adbridge — Graph API Client
//  Thin wrapper over a pooled reqwest client. Injects the bearer
//  token server-side and hands back remote JSON untouched.
// ──────────────────────────────────────────────────────────────

use std::time::{Duration, Instant};

use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::GraphConfig;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    #[error("remote API returned {status}")]
    Remote { status: u16, body: Value },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("unreadable remote response: {0}")]
    Decode(String),

    #[error("invalid node id {0:?}")]
    InvalidNode(String),
}

/// Longest id accepted as a single Graph node.
const MAX_NODE_ID_LEN: usize = 64;

/// A bare Graph object id: ASCII letters, digits and `_` only.
/// Anything else could address another node, an edge or another API version.
pub fn is_node_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_NODE_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn check_node(id: &str) -> Result<(), GraphError> {
    if is_node_id(id) {
        Ok(())
    } else {
        Err(GraphError::InvalidNode(id.to_string()))
    }
}

/// Parameters for the account-level insights edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightsQuery {
    pub level: String,
    pub since: String,
    pub until: String,
    pub time_increment: Option<String>,
    pub breakdowns: Option<String>,
    pub fields: String,
}

impl InsightsQuery {
    /// Query-string pairs in the shape the Graph API expects.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("level", self.level.clone()),
            (
                "time_range",
                json!({ "since": self.since, "until": self.until }).to_string(),
            ),
            ("fields", self.fields.clone()),
        ];
        if let Some(ref inc) = self.time_increment {
            params.push(("time_increment", inc.clone()));
        }
        if let Some(ref b) = self.breakdowns {
            params.push(("breakdowns", b.clone()));
        }
        params
    }
}

pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    access_token: Option<String>,
    ad_account_id: Option<String>,
}

impl GraphClient {
    pub fn new(config: &GraphConfig) -> Result<Self, GraphError> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.trim_matches('/').to_string(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            ad_account_id: config.ad_account_id.clone().filter(|a| !a.is_empty()),
        })
    }

    /// `act_<id>` regardless of how the id was configured.
    pub fn account_node(&self) -> Result<String, GraphError> {
        let id = self
            .ad_account_id
            .as_deref()
            .ok_or(GraphError::NotConfigured("META_AD_ACCOUNT_ID"))?;
        Ok(if id.starts_with("act_") {
            id.to_string()
        } else {
            format!("act_{}", id)
        })
    }

    fn url(&self, node: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, node)
    }

    fn request(&self, method: Method, node: &str) -> Result<RequestBuilder, GraphError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(GraphError::NotConfigured("META_ACCESS_TOKEN"))?;
        Ok(self.http.request(method, self.url(node)).bearer_auth(token))
    }

    // ── Edges ──────────────────────────────────────────────────

    pub async fn insights(&self, query: &InsightsQuery) -> Result<Value, GraphError> {
        let node = format!("{}/insights", self.account_node()?);
        let req = self.request(Method::GET, &node)?.query(&query.to_params());
        self.send(req, &node).await
    }

    pub async fn update_adset_budget(&self, adset_id: &str, cents: i64) -> Result<Value, GraphError> {
        check_node(adset_id)?;
        let req = self
            .request(Method::POST, adset_id)?
            .json(&json!({ "daily_budget": cents }));
        self.send(req, adset_id).await
    }

    pub async fn update_ad_status(&self, ad_id: &str, status: &str) -> Result<Value, GraphError> {
        check_node(ad_id)?;
        let req = self
            .request(Method::POST, ad_id)?
            .json(&json!({ "status": status }));
        self.send(req, ad_id).await
    }

    // ── Transport ──────────────────────────────────────────────

    async fn send(&self, req: RequestBuilder, node: &str) -> Result<Value, GraphError> {
        let start = Instant::now();
        let response = req.send().await.map_err(|e| {
            error!(node = node, "Graph request failed: {}", e);
            GraphError::Transport(e)
        })?;

        let status = response.status();
        let text = response.text().await?;
        let body = parse_body(&text);

        info!(
            node = node,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Graph request completed"
        );

        if status.is_success() {
            body.ok_or_else(|| GraphError::Decode(truncate(&text, 200)))
        } else {
            debug!(node = node, body = %truncate(&text, 500), "Graph error body");
            Err(GraphError::Remote {
                status: status.as_u16(),
                body: body.unwrap_or_else(|| json!({ "message": text })),
            })
        }
    }
}

fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_str(text).ok()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(account: Option<&str>, token: Option<&str>) -> GraphClient {
        let config = GraphConfig {
            base_url: "http://graph.test/".into(),
            access_token: token.map(String::from),
            ad_account_id: account.map(String::from),
            ..GraphConfig::default()
        };
        GraphClient::new(&config).unwrap()
    }

    #[test]
    fn test_account_node_prefix() {
        assert_eq!(client(Some("123"), None).account_node().unwrap(), "act_123");
        assert_eq!(client(Some("act_123"), None).account_node().unwrap(), "act_123");
        assert!(matches!(
            client(None, None).account_node(),
            Err(GraphError::NotConfigured("META_AD_ACCOUNT_ID"))
        ));
    }

    #[test]
    fn test_url_trims_slashes() {
        assert_eq!(client(None, None).url("42"), "http://graph.test/v19.0/42");
    }

    #[test]
    fn test_missing_token() {
        assert!(matches!(
            client(Some("1"), Some("")).request(Method::GET, "x"),
            Err(GraphError::NotConfigured("META_ACCESS_TOKEN"))
        ));
    }

    #[test]
    fn test_node_id_rules() {
        assert!(is_node_id("120330000123"));
        assert!(is_node_id("act_42"));
        assert!(!is_node_id(""));
        assert!(!is_node_id("act_42/campaigns"));
        assert!(!is_node_id("../v2.0/act_42/adsets"));
        assert!(!is_node_id("123?name=x"));
        assert!(!is_node_id("12 3"));
        assert!(!is_node_id("１２３"));
        assert!(!is_node_id(&"9".repeat(65)));
    }

    #[tokio::test]
    async fn test_writes_refuse_paths_before_sending() {
        // Nothing listens on graph.test; a request that got this far would be a transport error.
        let graph = client(Some("1"), Some("token"));
        assert!(matches!(
            graph.update_adset_budget("act_42/campaigns", 500).await,
            Err(GraphError::InvalidNode(id)) if id == "act_42/campaigns"
        ));
        assert!(matches!(
            graph.update_ad_status("../v2.0/7", "PAUSED").await,
            Err(GraphError::InvalidNode(_))
        ));
    }

    #[test]
    fn test_insights_params() {
        let q = InsightsQuery {
            level: "campaign".into(),
            since: "2024-01-01".into(),
            until: "2024-01-31".into(),
            time_increment: Some("1".into()),
            breakdowns: None,
            fields: "spend,clicks".into(),
        };
        let params = q.to_params();
        let time_range = params.iter().find(|(k, _)| *k == "time_range").unwrap();
        let parsed: Value = serde_json::from_str(&time_range.1).unwrap();
        assert_eq!(parsed, json!({"since": "2024-01-01", "until": "2024-01-31"}));
        assert!(params.iter().any(|(k, v)| *k == "time_increment" && v == "1"));
        assert!(!params.iter().any(|(k, _)| *k == "breakdowns"));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Some(json!({})));
        assert_eq!(parse_body("{\"success\":true}"), Some(json!({"success": true})));
        assert_eq!(parse_body("<html>"), None);
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
