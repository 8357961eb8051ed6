use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::{mpesa_handlers, payments};
use crate::state::AppState;

pub fn mpesa_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(mpesa_handlers::index))
        .route("/health", get(mpesa_health))

        // STK push flow
        .route(
            "/stk-push",
            post(mpesa_handlers::stk_push).fallback(mpesa_handlers::not_allowed),
        )
        .route("/callback", post(mpesa_handlers::stk_callback))
        .route("/check-status", get(mpesa_handlers::check_status))

        // Read-only audit views
        .route("/payments", get(payments::list_payments))
        .route("/payments/stats", get(payments::payment_stats))
}

async fn mpesa_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "mpesa-stk",
        "store": state.payments.store().name(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
