// handlers/mpesa_handlers.rs
use axum::{
    body::Bytes,
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::errors::{AppError, Result};
use crate::services::payment_service::{CallbackDisposition, StatusView, StkPushInput};
use crate::state::AppState;

const PAYMENT_FORM: &str = include_str!("../../assets/payment_form.html");

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub checkout_request_id: Option<String>,
}

pub async fn index() -> Html<&'static str> {
    Html(PAYMENT_FORM)
}

pub async fn stk_push(
    State(state): State<AppState>,
    form: std::result::Result<Form<StkPushInput>, FormRejection>,
) -> Result<Json<Value>> {
    let Form(input) = form.map_err(|e| AppError::validation(e.body_text()))?;

    let initiated = state.payments.initiate(&input).await?;

    Ok(Json(json!({
        "status": "success",
        "checkout_request_id": initiated.checkout_request_id,
        "customer_message": initiated.customer_message,
    })))
}

/// The provider only looks at the status code, so every outcome is a bare
/// status with an empty body.
pub async fn stk_callback(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match state.payments.handle_callback(&body).await {
        // Duplicates are acknowledged so the provider stops redelivering.
        Ok(CallbackDisposition::Applied(_)) | Ok(CallbackDisposition::Duplicate(_)) => {
            StatusCode::OK
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                error!("Callback processing failed: {}", e);
            }
            status
        }
    }
}

pub async fn check_status(
    State(state): State<AppState>,
    query: std::result::Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<StatusView>> {
    let Query(query) = query.map_err(|e| AppError::validation(e.body_text()))?;
    let view = state
        .payments
        .check_status(query.checkout_request_id.as_deref())
        .await?;
    Ok(Json(view))
}

pub async fn not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "status": "error",
            "message": "Invalid request method",
        })),
    )
}
