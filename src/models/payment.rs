use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Success,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown payment status: {}", s))
    }
}

/// Narrows a payment listing. `search` is a case-insensitive substring match
/// against phone number, checkout id and receipt number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub search: Option<String>,
}

impl PaymentFilter {
    pub fn matches(&self, attempt: &PaymentAttempt) -> bool {
        if self.status.is_some_and(|status| status != attempt.status) {
            return false;
        }

        let Some(needle) = self.search.as_deref() else {
            return true;
        };
        let needle = needle.to_lowercase();
        [
            Some(attempt.phone_number.as_str()),
            Some(attempt.checkout_request_id.as_str()),
            attempt.receipt_number.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// One STK push attempt, keyed by the gateway's checkout request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub phone_number: String,
    pub amount: Decimal,
    pub reference: String,
    pub status: PaymentStatus,
    pub result_code: Option<i64>,
    pub result_description: Option<String>,
    pub receipt_number: Option<String>,
    pub callback_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub callback_received_at: Option<DateTime<Utc>>,
}

impl PaymentAttempt {
    pub fn pending(
        checkout_request_id: String,
        merchant_request_id: Option<String>,
        phone_number: String,
        amount: Decimal,
        reference: String,
        now: DateTime<Utc>,
    ) -> Self {
        PaymentAttempt {
            checkout_request_id,
            merchant_request_id,
            phone_number,
            amount,
            reference,
            status: PaymentStatus::Pending,
            result_code: None,
            result_description: None,
            receipt_number: None,
            callback_metadata: None,
            created_at: now,
            updated_at: now,
            callback_received_at: None,
        }
    }

    /// Moves a pending attempt into the terminal state carried by `update`.
    /// Returns `false` and leaves every field untouched if the attempt is
    /// already terminal.
    pub fn apply(&mut self, update: &TerminalUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.status = update.status;
        self.result_code = Some(update.result_code);
        self.result_description = update.result_description.clone();
        self.receipt_number = update.receipt_number.clone();
        self.callback_metadata = update.callback_metadata.clone();
        self.updated_at = update.received_at;
        self.callback_received_at = Some(update.received_at);
        true
    }
}

impl fmt::Display for PaymentAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - KES {}",
            self.checkout_request_id, self.phone_number, self.amount
        )
    }
}

/// Fields written when a callback finalises an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalUpdate {
    pub status: PaymentStatus,
    pub result_code: i64,
    pub result_description: Option<String>,
    pub receipt_number: Option<String>,
    pub callback_metadata: Option<serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

/// Result of a compare-and-set against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(PaymentAttempt),
    AlreadyTerminal(PaymentAttempt),
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentStats {
    pub total: u64,
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl PaymentStats {
    pub fn record(&mut self, status: PaymentStatus, count: u64) {
        self.total += count;
        match status {
            PaymentStatus::Pending => self.pending += count,
            PaymentStatus::Success => self.success += count,
            PaymentStatus::Failed => self.failed += count,
            PaymentStatus::Cancelled => self.cancelled += count,
        }
    }
}
