// services/gateway.rs
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

pub const ACCEPTED_RESPONSE_CODE: &str = "0";

/// What the initiator hands to the payment gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct StkPushParams {
    pub phone_number: String,
    pub amount: Decimal,
    pub account_reference: String,
    pub transaction_desc: String,
    pub callback_url: String,
}

/// Immediate acknowledgment of an STK push. The final result arrives later
/// through the callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayAck {
    pub response_code: String,
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub customer_message: Option<String>,
    pub error_message: Option<String>,
}

impl GatewayAck {
    pub fn is_accepted(&self) -> bool {
        self.response_code.trim() == ACCEPTED_RESPONSE_CODE
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected gateway response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_payment(&self, params: &StkPushParams) -> Result<GatewayAck, GatewayError>;
}
