// models/callback.rs
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::errors::{AppError, Result};
use crate::models::payment::{PaymentStatus, TerminalUpdate};

pub const RESULT_CODE_SUCCESS: i64 = 0;
pub const RESULT_CODE_CANCELLED: i64 = 1032;
pub const RECEIPT_ITEM_NAME: &str = "MpesaReceiptNumber";
pub const DEFAULT_FAILURE_DESCRIPTION: &str = "Payment failed";

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,

    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,

    #[serde(rename = "ResultCode", deserialize_with = "result_code")]
    pub result_code: i64,

    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,

    /// Kept as received for the audit trail; `CallbackMetadata` is a typed
    /// view over it.
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl CallbackMetadata {
    pub fn receipt_number(&self) -> Option<String> {
        self.items
            .iter()
            .find(|item| item.name == RECEIPT_ITEM_NAME)
            .and_then(|item| match item.value.as_ref()? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
    }
}

// Daraja sends ResultCode as a number; some relays forward it as a string.
fn result_code<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Number(n) => Ok(n),
        Code::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid ResultCode '{}'", s))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success { receipt_number: Option<String> },
    Cancelled,
    Failed { description: String },
}

impl CallbackOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            CallbackOutcome::Success { .. } => PaymentStatus::Success,
            CallbackOutcome::Cancelled => PaymentStatus::Cancelled,
            CallbackOutcome::Failed { .. } => PaymentStatus::Failed,
        }
    }
}

/// A callback that passed boundary validation.
#[derive(Debug, Clone)]
pub struct ParsedCallback {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub result_code: i64,
    pub result_desc: Option<String>,
    pub outcome: CallbackOutcome,
    pub metadata: Option<CallbackMetadata>,
    pub raw_metadata: Option<serde_json::Value>,
}

impl ParsedCallback {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let envelope: CallbackEnvelope = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedCallback(e.to_string()))?;

        let callback = envelope.body.stk_callback;

        let checkout_request_id = callback
            .checkout_request_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::validation("CheckoutRequestID is required"))?;

        let metadata = callback
            .callback_metadata
            .as_ref()
            .map(|raw| serde_json::from_value::<CallbackMetadata>(raw.clone()))
            .transpose()
            .map_err(|e| AppError::MalformedCallback(format!("CallbackMetadata: {}", e)))?;

        let outcome = match callback.result_code {
            RESULT_CODE_SUCCESS => CallbackOutcome::Success {
                receipt_number: metadata.as_ref().and_then(CallbackMetadata::receipt_number),
            },
            RESULT_CODE_CANCELLED => CallbackOutcome::Cancelled,
            _ => CallbackOutcome::Failed {
                description: callback
                    .result_desc
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_DESCRIPTION.to_string()),
            },
        };

        Ok(ParsedCallback {
            checkout_request_id,
            merchant_request_id: callback.merchant_request_id,
            result_code: callback.result_code,
            result_desc: callback.result_desc,
            outcome,
            metadata,
            raw_metadata: callback.callback_metadata,
        })
    }

    pub fn into_update(self, received_at: DateTime<Utc>) -> TerminalUpdate {
        let status = self.outcome.status();
        let (receipt_number, result_description) = match self.outcome {
            CallbackOutcome::Success { receipt_number } => (receipt_number, self.result_desc),
            CallbackOutcome::Cancelled => (None, self.result_desc),
            CallbackOutcome::Failed { description } => (None, Some(description)),
        };

        TerminalUpdate {
            status,
            result_code: self.result_code,
            result_description,
            receipt_number,
            callback_metadata: self.raw_metadata,
            received_at,
        }
    }
}
