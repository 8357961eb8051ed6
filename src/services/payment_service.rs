// services/payment_service.rs
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::database::PaymentStore;
use crate::errors::{AppError, Result};
use crate::models::callback::ParsedCallback;
use crate::models::payment::{
    PaymentAttempt, PaymentFilter, PaymentStats, PaymentStatus, TransitionOutcome,
};
use crate::services::gateway::{PaymentGateway, StkPushParams};

pub const DEFAULT_REFERENCE: &str = "Payment";
pub const MAX_REFERENCE_CHARS: usize = 20;
pub const TRANSACTION_DESC: &str = "Customer Payment";
pub const GATEWAY_FALLBACK_MESSAGE: &str = "Payment request failed";

const MSG_WAITING: &str = "Waiting for payment confirmation";
const MSG_SUCCESS: &str = "Payment completed successfully";
const MSG_CANCELLED: &str = "Payment was cancelled by the user";

/// Raw STK push input as submitted by the payment form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StkPushInput {
    pub phone: Option<String>,
    pub amount: Option<String>,
    pub reference: Option<String>,
}

/// Input after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPaymentRequest {
    pub phone_number: String,
    pub amount: Decimal,
    pub reference: String,
}

impl StkPushInput {
    pub fn validate(&self) -> Result<ValidPaymentRequest> {
        let phone = self.phone.as_deref().map(str::trim).unwrap_or_default();
        let amount = self.amount.as_deref().map(str::trim).unwrap_or_default();

        if phone.is_empty() || amount.is_empty() {
            return Err(AppError::validation("Phone number and amount are required"));
        }

        // Whole shillings only; "1.5" and "1e2" are not valid amounts.
        let amount = Decimal::from_str(amount)
            .ok()
            .filter(|a| a.fract().is_zero())
            .map(|a| a.trunc().normalize())
            .ok_or_else(|| AppError::validation("Amount must be a valid number"))?;
        if amount < Decimal::ONE {
            return Err(AppError::validation("Amount must be at least 1"));
        }

        if !is_valid_phone(phone) {
            return Err(AppError::validation(
                "Phone number must be in the format 254XXXXXXXXX",
            ));
        }

        let reference = self
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REFERENCE)
            .chars()
            .take(MAX_REFERENCE_CHARS)
            .collect();

        Ok(ValidPaymentRequest {
            phone_number: phone.to_string(),
            amount,
            reference,
        })
    }
}

/// `254` followed by nine digits.
pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == 12 && phone.starts_with("254") && phone.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiatedPayment {
    pub checkout_request_id: String,
    pub customer_message: String,
}

/// What a poller sees for one checkout id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub status: PaymentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StatusView {
    /// Shape returned while nothing is known about the checkout id yet.
    pub fn pending_default() -> Self {
        StatusView {
            status: PaymentStatus::Pending,
            message: MSG_WAITING.to_string(),
            phone: None,
            amount: None,
            reference: None,
            receipt: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl From<&PaymentAttempt> for StatusView {
    fn from(attempt: &PaymentAttempt) -> Self {
        let message = match attempt.status {
            PaymentStatus::Pending => MSG_WAITING.to_string(),
            PaymentStatus::Success => MSG_SUCCESS.to_string(),
            PaymentStatus::Cancelled => MSG_CANCELLED.to_string(),
            PaymentStatus::Failed => attempt
                .result_description
                .clone()
                .unwrap_or_else(|| "Payment failed".to_string()),
        };

        StatusView {
            status: attempt.status,
            message,
            phone: Some(attempt.phone_number.clone()),
            amount: Some(attempt.amount),
            reference: Some(attempt.reference.clone()),
            receipt: match attempt.status {
                PaymentStatus::Success => attempt.receipt_number.clone(),
                _ => None,
            },
            created_at: Some(attempt.created_at.to_rfc3339()),
            updated_at: Some(attempt.updated_at.to_rfc3339()),
        }
    }
}

/// How a well-formed callback was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDisposition {
    Applied(PaymentStatus),
    Duplicate(PaymentStatus),
}

/// The STK push reconciliation flow: initiation, callback reduction and
/// status polling over one injected store.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn PaymentStore>,
    callback_url: String,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn PaymentStore>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            callback_url: callback_url.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    pub async fn initiate(&self, input: &StkPushInput) -> Result<InitiatedPayment> {
        let request = input.validate().map_err(|e| {
            debug!("Rejected STK push input: {}", e);
            e
        })?;

        let params = StkPushParams {
            phone_number: request.phone_number.clone(),
            amount: request.amount,
            account_reference: request.reference.clone(),
            transaction_desc: TRANSACTION_DESC.to_string(),
            callback_url: self.callback_url.clone(),
        };

        let ack = self.gateway.initiate_payment(&params).await.map_err(|e| {
            error!("STK push to {} failed: {}", request.phone_number, e);
            AppError::internal(e.to_string())
        })?;

        if !ack.is_accepted() {
            warn!(
                "Gateway rejected STK push for {}: {} {:?}",
                request.phone_number, ack.response_code, ack.error_message
            );
            let message = ack
                .error_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| GATEWAY_FALLBACK_MESSAGE.to_string());
            return Err(AppError::gateway(message));
        }

        let checkout_request_id = ack
            .checkout_request_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::internal("gateway accepted request without CheckoutRequestID"))?;

        let attempt = PaymentAttempt::pending(
            checkout_request_id.clone(),
            ack.merchant_request_id,
            request.phone_number,
            request.amount,
            request.reference,
            Utc::now(),
        );
        info!("STK push accepted: {}", attempt);
        self.store.insert(attempt).await?;

        Ok(InitiatedPayment {
            checkout_request_id,
            customer_message: ack.customer_message.unwrap_or_default(),
        })
    }

    pub async fn handle_callback(&self, body: &[u8]) -> Result<CallbackDisposition> {
        let callback = ParsedCallback::parse(body).map_err(|e| {
            warn!("Rejected STK callback: {}", e);
            e
        })?;

        let checkout_request_id = callback.checkout_request_id.clone();
        let update = callback.into_update(Utc::now());

        match self.store.complete(&checkout_request_id, update).await? {
            TransitionOutcome::Applied(attempt) => {
                info!(
                    "Payment {} is now {} (result code {:?})",
                    checkout_request_id, attempt.status, attempt.result_code
                );
                Ok(CallbackDisposition::Applied(attempt.status))
            }
            TransitionOutcome::AlreadyTerminal(attempt) => {
                warn!(
                    "Duplicate callback for {} ignored, payment already {}",
                    checkout_request_id, attempt.status
                );
                Ok(CallbackDisposition::Duplicate(attempt.status))
            }
            TransitionOutcome::NotFound => {
                warn!("Callback for unknown checkout id {}", checkout_request_id);
                Err(AppError::NotFound(checkout_request_id))
            }
        }
    }

    pub async fn check_status(&self, checkout_request_id: Option<&str>) -> Result<StatusView> {
        let checkout_request_id = checkout_request_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::validation("Checkout request ID is required"))?;

        let Some(attempt) = self.store.find(checkout_request_id).await? else {
            return Ok(StatusView::pending_default());
        };

        let view = StatusView::from(&attempt);
        if attempt.status.is_terminal() {
            self.store.release(checkout_request_id).await?;
        }
        Ok(view)
    }

    pub async fn recent(&self, filter: &PaymentFilter, limit: usize) -> Result<Vec<PaymentAttempt>> {
        self.store.list_recent(filter, limit).await
    }

    pub async fn stats(&self) -> Result<PaymentStats> {
        self.store.stats().await
    }
}
