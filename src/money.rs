//! EUR to minor-unit conversion for daily budgets.

use crate::error::GatewayError;

/// Convert euros to cents, rounding half away from zero.
///
/// The Graph API stores budgets as integer cents; anything that isn't a
/// finite, non-negative amount is rejected before it leaves the gateway.
pub fn to_cents(eur: f64) -> Result<i64, GatewayError> {
    if !eur.is_finite() {
        return Err(GatewayError::BadRequest(
            "daily_budget_eur must be a finite number".to_string(),
        ));
    }
    if eur < 0.0 {
        return Err(GatewayError::BadRequest(
            "daily_budget_eur must not be negative".to_string(),
        ));
    }
    let cents = (eur * 100.0).round();
    // i64::MAX as f64 rounds up to 2^63, which itself does not fit.
    if cents >= i64::MAX as f64 {
        return Err(GatewayError::BadRequest(
            "daily_budget_eur is out of range".to_string(),
        ));
    }
    Ok(cents as i64)
}
