//! Billing period handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use tally_core::{BillingPeriod, YearMonth};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Refresh and return the caller's summary for `YYYY-MM`.
pub async fn get_period(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(year_month): Path<String>,
) -> Result<Json<BillingPeriod>, ApiError> {
    let year_month: YearMonth = year_month.parse()?;
    Ok(Json(
        state.ledger.periods.refresh(&auth.account_id, year_month)?,
    ))
}
