use async_trait::async_trait;

use crate::errors::Result;
use crate::models::payment::{
    PaymentAttempt, PaymentFilter, PaymentStats, TerminalUpdate, TransitionOutcome,
};

pub mod memory;
pub mod mongo;

pub use memory::MemoryPaymentStore;
pub use mongo::MongoPaymentStore;

/// Record store behind the STK push flow.
///
/// `complete` must perform the terminal-state check and the write as one
/// indivisible step: providers redeliver callbacks, and two deliveries for the
/// same checkout id may arrive concurrently.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Inserts a new pending attempt. Fails with `DuplicateKey` if the
    /// checkout id is already known.
    async fn insert(&self, attempt: PaymentAttempt) -> Result<()>;

    async fn find(&self, checkout_request_id: &str) -> Result<Option<PaymentAttempt>>;

    /// Applies `update` only if the attempt is still pending.
    async fn complete(
        &self,
        checkout_request_id: &str,
        update: TerminalUpdate,
    ) -> Result<TransitionOutcome>;

    /// Called once a terminal attempt has been reported to a poller.
    /// Durable stores keep the record.
    async fn release(&self, _checkout_request_id: &str) -> Result<()> {
        Ok(())
    }

    /// Most recent attempts matching `filter`, newest first.
    async fn list_recent(&self, filter: &PaymentFilter, limit: usize) -> Result<Vec<PaymentAttempt>>;

    async fn stats(&self) -> Result<PaymentStats>;
}
