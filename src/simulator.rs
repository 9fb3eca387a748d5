// ──────────────────────────────────────────────────────────────
//  adbridge — Approval Simulator
//  Evaluates proposed budget/status changes against static
//  thresholds. Pure: no I/O, no shared state, one decision per
//  proposal in input order.
// ──────────────────────────────────────────────────────────────

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const BUDGET_CHANGE: &str = "budget_change";
pub const STATUS_CHANGE: &str = "status_change";

// ── Policy ─────────────────────────────────────────────────────

/// Static thresholds, as written under `[policy]` in the config file.
/// The camelCase spellings used on the wire are accepted too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    #[serde(default = "default_max_increase", alias = "maxIncreasePct")]
    pub max_increase_pct: f64,
    #[serde(default = "default_max_decrease", alias = "maxDecreasePct")]
    pub max_decrease_pct: f64,
    #[serde(default = "default_min_budget", alias = "minDailyBudgetEur")]
    pub min_daily_budget_eur: f64,
    #[serde(default = "default_statuses", alias = "allowedStatuses")]
    pub allowed_statuses: BTreeSet<String>,
}

fn default_max_increase() -> f64 { 30.0 }
fn default_max_decrease() -> f64 { 50.0 }
fn default_min_budget() -> f64 { 5.0 }
fn default_statuses() -> BTreeSet<String> {
    ["ACTIVE", "PAUSED", "ARCHIVED"].iter().map(|s| s.to_string()).collect()
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_increase_pct: default_max_increase(),
            max_decrease_pct: default_max_decrease(),
            min_daily_budget_eur: default_min_budget(),
            allowed_statuses: default_statuses(),
        }
    }
}

/// The policy as echoed in a simulation report.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    pub max_increase_pct: f64,
    pub max_decrease_pct: f64,
    pub min_daily_budget_eur: f64,
    pub allowed_statuses: BTreeSet<String>,
}

impl From<&Policy> for PolicySnapshot {
    fn from(p: &Policy) -> Self {
        Self {
            max_increase_pct: p.max_increase_pct,
            max_decrease_pct: p.max_decrease_pct,
            min_daily_budget_eur: p.min_daily_budget_eur,
            allowed_statuses: p.allowed_statuses.clone(),
        }
    }
}

// ── Loose fields ───────────────────────────────────────────────
// Shared by proposals and the gateway routes.

/// Non-empty trimmed string, or an integer rendered as one.
pub fn value_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    }
}

/// A finite number, or a string that parses as one.
pub fn value_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdOrInt {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn loose_id<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<IdOrInt>::deserialize(d)? {
        Some(IdOrInt::Unsigned(n)) => Some(n.to_string()),
        Some(IdOrInt::Signed(n)) => Some(n.to_string()),
        Some(IdOrInt::Text(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        None => None,
    })
}

fn loose_label<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_id(d)?.unwrap_or_default())
}

fn loose_number<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let n = match Option::<NumberOrText>::deserialize(d)? {
        Some(NumberOrText::Number(n)) => n,
        Some(NumberOrText::Text(s)) if s.trim().is_empty() => return Ok(None),
        Some(NumberOrText::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("expected a number, got {:?}", s)))?,
        None => return Ok(None),
    };
    if n.is_finite() {
        Ok(Some(n))
    } else {
        Err(D::Error::custom("expected a finite number"))
    }
}

// ── Proposals & Decisions ──────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    #[serde(default, deserialize_with = "loose_label")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "loose_number", skip_serializing_if = "Option::is_none")]
    pub delta_pct: Option<f64>,
    #[serde(default, deserialize_with = "loose_number", skip_serializing_if = "Option::is_none")]
    pub new_daily_budget_eur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    /// Apply target for budget changes.
    #[serde(default, deserialize_with = "loose_id", skip_serializing_if = "Option::is_none")]
    pub adset_id: Option<String>,
    /// Apply target for status changes.
    #[serde(default, deserialize_with = "loose_id", skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDecision {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub approved: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_error: Option<Value>,
}

impl PolicyDecision {
    fn approve(p: &Proposal, reason: impl Into<String>) -> Self {
        Self::new(p, true, reason.into())
    }

    fn reject(p: &Proposal, reason: impl Into<String>) -> Self {
        Self::new(p, false, reason.into())
    }

    fn new(p: &Proposal, approved: bool, reason: String) -> Self {
        Self {
            id: p.id.clone(),
            kind: p.kind.clone(),
            approved,
            reason,
            applied: None,
            apply_error: None,
        }
    }
}

// ── Evaluation ─────────────────────────────────────────────────

/// Evaluate one proposal. Checks run in a fixed order and the first
/// violation wins.
pub fn evaluate(policy: &Policy, proposal: &Proposal) -> PolicyDecision {
    match proposal.kind.as_str() {
        BUDGET_CHANGE => evaluate_budget(policy, proposal),
        STATUS_CHANGE => evaluate_status(policy, proposal),
        _ => PolicyDecision::reject(proposal, "unsupported type"),
    }
}

pub fn evaluate_all(policy: &Policy, proposals: &[Proposal]) -> Vec<PolicyDecision> {
    proposals.iter().map(|p| evaluate(policy, p)).collect()
}

fn evaluate_budget(policy: &Policy, p: &Proposal) -> PolicyDecision {
    if let Some(budget) = p.new_daily_budget_eur {
        if budget < policy.min_daily_budget_eur {
            return PolicyDecision::reject(
                p,
                format!(
                    "daily budget {:.2} EUR below minimum {:.2} EUR",
                    budget, policy.min_daily_budget_eur
                ),
            );
        }
    }

    if let Some(delta) = p.delta_pct {
        if delta > policy.max_increase_pct {
            return PolicyDecision::reject(
                p,
                format!("increase {}% exceeds max {}%", delta, policy.max_increase_pct),
            );
        }
        if delta < -policy.max_decrease_pct {
            return PolicyDecision::reject(
                p,
                format!("decrease {}% exceeds max {}%", -delta, policy.max_decrease_pct),
            );
        }
    }

    PolicyDecision::approve(p, "within budget policy")
}

fn evaluate_status(policy: &Policy, p: &Proposal) -> PolicyDecision {
    match p.new_status.as_deref() {
        Some(status) if policy.allowed_statuses.contains(status) => {
            PolicyDecision::approve(p, format!("status {} allowed", status))
        }
        Some(status) => PolicyDecision::reject(p, format!("status {} not allowed", status)),
        None => PolicyDecision::reject(p, "new_status missing"),
    }
}

// ── Request / Report ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    Batch,
    Single,
}

/// Body of `POST /api/simulate`: either `proposals` or `action` + `payload`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulationRequest {
    #[serde(default)]
    pub proposals: Option<Vec<Proposal>>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
    /// Forward approved proposals to the Graph API after evaluation.
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub mode: SimulationMode,
    pub context_echo: Value,
    pub policy: PolicySnapshot,
    pub results: Vec<PolicyDecision>,
    pub timestamp: String,
}

impl SimulationRequest {
    /// Normalize either input shape into an ordered proposal list.
    /// Returns `None` when neither `proposals` nor `action` is present.
    pub fn to_proposals(&self) -> Option<(SimulationMode, Vec<Proposal>)> {
        if let Some(ref proposals) = self.proposals {
            return Some((SimulationMode::Batch, proposals.clone()));
        }
        let action = self.action.as_deref()?;
        let payload = self.payload.clone().unwrap_or(Value::Null);
        Some((SimulationMode::Single, vec![proposal_from_action(action, &payload)]))
    }
}

fn proposal_from_action(action: &str, payload: &Value) -> Proposal {
    let str_field = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
    let id_field = |key: &str| payload.get(key).and_then(value_id);
    let num_field = |key: &str| payload.get(key).and_then(value_number);

    let mut proposal = Proposal {
        id: id_field("id").unwrap_or_else(|| "single".to_string()),
        kind: action.to_string(),
        ..Proposal::default()
    };

    match action {
        "update_adset_budget" => {
            proposal.kind = BUDGET_CHANGE.to_string();
            proposal.adset_id = id_field("adset_id");
            proposal.new_daily_budget_eur = num_field("daily_budget_eur");
            proposal.delta_pct = num_field("delta_pct");
        }
        "update_ad_status" => {
            proposal.kind = STATUS_CHANGE.to_string();
            proposal.ad_id = id_field("ad_id");
            proposal.new_status = str_field("status");
        }
        _ => {}
    }
    proposal
}

/// Run a full simulation. `None` means the request carried no proposals
/// and no action.
pub fn simulate(policy: &Policy, request: &SimulationRequest) -> Option<SimulationReport> {
    let (mode, proposals) = request.to_proposals()?;
    Some(SimulationReport {
        mode,
        context_echo: request.context.clone().unwrap_or_else(|| Value::Object(Default::default())),
        policy: PolicySnapshot::from(policy),
        results: evaluate_all(policy, &proposals),
        timestamp: Utc::now().to_rfc3339(),
    })
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn budget(id: &str, delta: Option<f64>, eur: Option<f64>) -> Proposal {
        Proposal {
            id: id.to_string(),
            kind: BUDGET_CHANGE.to_string(),
            delta_pct: delta,
            new_daily_budget_eur: eur,
            new_status: None,
            adset_id: None,
            ad_id: None,
        }
    }

    fn status(id: &str, s: &str) -> Proposal {
        Proposal {
            id: id.to_string(),
            kind: STATUS_CHANGE.to_string(),
            delta_pct: None,
            new_daily_budget_eur: None,
            new_status: Some(s.to_string()),
            adset_id: None,
            ad_id: None,
        }
    }

    #[test]
    fn test_increase_over_max_rejected() {
        let d = evaluate(&Policy::default(), &budget("p1", Some(40.0), Some(100.0)));
        assert!(!d.approved);
        assert!(d.reason.contains("exceeds max 30"));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let policy = Policy::default();
        assert!(evaluate(&policy, &budget("a", Some(30.0), None)).approved);
        assert!(evaluate(&policy, &budget("b", Some(-50.0), None)).approved);
        assert!(!evaluate(&policy, &budget("c", Some(-50.5), None)).approved);
        assert!(evaluate(&policy, &budget("d", None, Some(5.0))).approved);
    }

    #[test]
    fn test_budget_floor_checked_first() {
        let d = evaluate(&Policy::default(), &budget("p", Some(90.0), Some(1.0)));
        assert!(!d.approved);
        assert!(d.reason.contains("below minimum"));
    }

    #[test]
    fn test_budget_without_fields_approved() {
        assert!(evaluate(&Policy::default(), &budget("p", None, None)).approved);
    }

    #[test]
    fn test_status_rules() {
        let policy = Policy::default();
        assert!(evaluate(&policy, &status("s1", "PAUSED")).approved);
        assert!(!evaluate(&policy, &status("s2", "DELETED")).approved);
        assert!(!evaluate(&policy, &status("s3", "paused")).approved);

        let mut missing = status("s4", "ACTIVE");
        missing.new_status = None;
        assert!(!evaluate(&policy, &missing).approved);
    }

    #[test]
    fn test_unknown_type() {
        let mut p = budget("x", None, None);
        p.kind = "creative_swap".into();
        let d = evaluate(&Policy::default(), &p);
        assert!(!d.approved);
        assert_eq!(d.reason, "unsupported type");
        assert_eq!(d.kind, "creative_swap");
    }

    #[test]
    fn test_batch_keeps_order() {
        let proposals = vec![status("a", "DELETED"), budget("b", Some(10.0), None), status("c", "ACTIVE")];
        let ids: Vec<_> = evaluate_all(&Policy::default(), &proposals)
            .into_iter()
            .map(|d| (d.id, d.approved))
            .collect();
        assert_eq!(ids, vec![("a".into(), false), ("b".into(), true), ("c".into(), true)]);
    }

    #[test]
    fn test_single_action_budget() {
        let req: SimulationRequest = serde_json::from_value(json!({
            "action": "update_adset_budget",
            "payload": {"adset_id": "123", "daily_budget_eur": 2.5},
            "context": {"user": "ops"}
        }))
        .unwrap();

        let report = simulate(&Policy::default(), &req).unwrap();
        assert_eq!(report.mode, SimulationMode::Single);
        assert_eq!(report.context_echo, json!({"user": "ops"}));
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].id, "single");
        assert_eq!(report.results[0].kind, BUDGET_CHANGE);
        assert!(!report.results[0].approved);
    }

    #[test]
    fn test_single_action_unknown() {
        let req = SimulationRequest {
            action: Some("delete_campaign".into()),
            ..Default::default()
        };
        let report = simulate(&Policy::default(), &req).unwrap();
        assert_eq!(report.results[0].reason, "unsupported type");
    }

    #[test]
    fn test_yaml_request() {
        let yaml = "proposals:\n  - id: y1\n    type: status_change\n    new_status: ARCHIVED\n    ad_id: \"77\"\n";
        let req: SimulationRequest = serde_yaml::from_str(yaml).unwrap();
        let report = simulate(&Policy::default(), &req).unwrap();
        assert!(report.results[0].approved);
        assert!(!req.apply);
    }

    #[test]
    fn test_proposal_accepts_loose_shapes() {
        let req: SimulationRequest = serde_json::from_value(json!({
            "proposals": [
                {"id": 7, "type": "budget_change", "delta_pct": "40", "adset_id": 2385},
                {"id": " b ", "type": "budget_change", "delta_pct": "10", "new_daily_budget_eur": "20.5", "adset_id": " "}
            ]
        }))
        .unwrap();
        let proposals = req.proposals.as_ref().unwrap();
        assert_eq!(proposals[0].id, "7");
        assert_eq!(proposals[0].adset_id.as_deref(), Some("2385"));
        assert_eq!(proposals[1].id, "b");
        assert_eq!(proposals[1].new_daily_budget_eur, Some(20.5));
        assert_eq!(proposals[1].adset_id, None);

        let results = simulate(&Policy::default(), &req).unwrap().results;
        assert!(!results[0].approved);
        assert!(results[0].reason.contains("increase 40%"));
        assert!(results[1].approved);
    }

    #[test]
    fn test_proposal_rejects_unusable_numbers() {
        for bad in [json!("forty"), json!("NaN"), json!("inf"), json!(true)] {
            let body = json!({"proposals": [{"id": "x", "type": "budget_change", "delta_pct": bad}]});
            assert!(serde_json::from_value::<SimulationRequest>(body).is_err());
        }
        let blank = json!({"proposals": [{"id": "x", "type": "budget_change", "delta_pct": ""}]});
        let req: SimulationRequest = serde_json::from_value(blank).unwrap();
        assert_eq!(req.proposals.unwrap()[0].delta_pct, None);
    }

    #[test]
    fn test_single_action_numeric_ids() {
        let req: SimulationRequest = serde_json::from_value(json!({
            "action": "update_ad_status",
            "payload": {"id": 3, "ad_id": 9001, "status": "PAUSED"}
        }))
        .unwrap();
        let (_, proposals) = req.to_proposals().unwrap();
        assert_eq!(proposals[0].id, "3");
        assert_eq!(proposals[0].ad_id.as_deref(), Some("9001"));
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(value_id(&json!(120330000)), Some("120330000".into()));
        assert_eq!(value_id(&json!(1.5)), None);
        assert_eq!(value_id(&json!("  ")), None);
        assert_eq!(value_number(&json!(" 12.5 ")), Some(12.5));
        assert_eq!(value_number(&json!("NaN")), None);
    }

    #[test]
    fn test_policy_config_keys_are_snake_case() {
        let rendered = toml::to_string(&Policy::default()).unwrap();
        assert!(rendered.contains("max_increase_pct"));
        assert!(!rendered.contains("maxIncreasePct"));

        let legacy: Policy = toml::from_str("maxIncreasePct = 12.0").unwrap();
        assert_eq!(legacy.max_increase_pct, 12.0);
        assert_eq!(legacy.max_decrease_pct, 50.0);
    }

    #[test]
    fn test_empty_request() {
        assert!(simulate(&Policy::default(), &SimulationRequest::default()).is_none());
    }

    #[test]
    fn test_report_shape() {
        let req = SimulationRequest {
            proposals: Some(vec![status("a", "ACTIVE")]),
            ..Default::default()
        };
        let v = serde_json::to_value(simulate(&Policy::default(), &req).unwrap()).unwrap();
        assert_eq!(v["mode"], "batch");
        assert_eq!(v["contextEcho"], json!({}));
        assert_eq!(v["policy"]["maxIncreasePct"], 30.0);
        assert_eq!(v["results"][0]["type"], "status_change");
        assert!(v["results"][0].get("applied").is_none());
        assert!(v["timestamp"].is_string());
    }
}
