use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{AppError, Result};
use crate::models::payment::{PaymentAttempt, PaymentFilter, PaymentStats, PaymentStatus};
use crate::state::AppState;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct PaymentListQuery {
    pub limit: Option<usize>,
    pub status: Option<String>,
    pub q: Option<String>,
}

impl PaymentListQuery {
    fn filter(&self) -> Result<PaymentFilter> {
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<PaymentStatus>)
            .transpose()
            .map_err(AppError::validation)?;

        let search = self
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        Ok(PaymentFilter { status, search })
    }
}

// GET /payments?limit=&status=&q= - most recent attempts, newest first
pub async fn list_payments(
    State(state): State<AppState>,
    query: std::result::Result<Query<PaymentListQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(query) = query.map_err(|e| AppError::validation(e.body_text()))?;
    let filter = query.filter()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let payments: Vec<PaymentAttempt> = state.payments.recent(&filter, limit).await?;

    Ok(Json(json!({
        "count": payments.len(),
        "payments": payments,
    })))
}

// GET /payments/stats - counts per status
pub async fn payment_stats(State(state): State<AppState>) -> Result<Json<PaymentStats>> {
    Ok(Json(state.payments.stats().await?))
}
