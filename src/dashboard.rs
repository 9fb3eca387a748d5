// ──────────────────────────────────────────────────────────────
//  adbridge — Campaign Dashboard
//  Single static page served by the gateway. All data flows
//  through the /api routes with the key the operator types in.
// ──────────────────────────────────────────────────────────────

use axum::response::Html;

/// Number of request/response pairs the page keeps in its history panel.
pub const HISTORY_LIMIT: usize = 20;

/// GET / — Serves the full HTML dashboard page
pub async fn handle_dashboard() -> Html<String> {
    Html(DASHBOARD_HTML.replace("__HISTORY_LIMIT__", &HISTORY_LIMIT.to_string()))
}

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_page_has_every_form() {
        let Html(page) = handle_dashboard().await;
        for route in ["/api/insights", "/api/adset_budget", "/api/ad_status", "/api/simulate"] {
            assert!(page.contains(route), "dashboard missing {}", route);
        }
        assert!(page.contains("X-API-Key"));
        assert!(!page.contains("__HISTORY_LIMIT__"));
    }
}
