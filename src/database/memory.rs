use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::database::PaymentStore;
use crate::errors::{AppError, Result};
use crate::models::payment::{
    PaymentAttempt, PaymentFilter, PaymentStats, TerminalUpdate, TransitionOutcome,
};

#[derive(Debug, Clone)]
struct Entry {
    attempt: PaymentAttempt,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Ephemeral store keyed by checkout id.
///
/// Entries live for `ttl` after creation; a terminal transition restarts the
/// clock so the poller has a full window to read the result. A terminal read
/// followed by `release` evicts the entry, so only the first poll after the
/// callback observes the final status.
#[derive(Clone)]
pub struct MemoryPaymentStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl MemoryPaymentStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Runs `purge_expired` every `period` until the task is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = store.purge_expired().await;
                if removed > 0 {
                    debug!("Purged {} expired payment entries", removed);
                }
            }
        })
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, attempt: PaymentAttempt) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&attempt.checkout_request_id) {
            if existing.is_live(now) {
                return Err(AppError::DuplicateKey(attempt.checkout_request_id));
            }
        }

        entries.insert(
            attempt.checkout_request_id.clone(),
            Entry {
                attempt,
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn find(&self, checkout_request_id: &str) -> Result<Option<PaymentAttempt>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(checkout_request_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.attempt.clone()))
    }

    async fn complete(
        &self,
        checkout_request_id: &str,
        update: TerminalUpdate,
    ) -> Result<TransitionOutcome> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        match entries.get(checkout_request_id).map(|entry| entry.is_live(now)) {
            Some(true) => {}
            Some(false) => {
                entries.remove(checkout_request_id);
                return Ok(TransitionOutcome::NotFound);
            }
            None => return Ok(TransitionOutcome::NotFound),
        }

        let Some(entry) = entries.get_mut(checkout_request_id) else {
            return Ok(TransitionOutcome::NotFound);
        };

        if entry.attempt.apply(&update) {
            entry.expires_at = now + self.ttl;
            Ok(TransitionOutcome::Applied(entry.attempt.clone()))
        } else {
            Ok(TransitionOutcome::AlreadyTerminal(entry.attempt.clone()))
        }
    }

    async fn release(&self, checkout_request_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let terminal = entries
            .get(checkout_request_id)
            .map(|entry| entry.attempt.status.is_terminal())
            .unwrap_or(false);
        if terminal {
            entries.remove(checkout_request_id);
        }
        Ok(())
    }

    async fn list_recent(&self, filter: &PaymentFilter, limit: usize) -> Result<Vec<PaymentAttempt>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut attempts: Vec<PaymentAttempt> = entries
            .values()
            .filter(|entry| entry.is_live(now) && filter.matches(&entry.attempt))
            .map(|entry| entry.attempt.clone())
            .collect();

        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn stats(&self) -> Result<PaymentStats> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut stats = PaymentStats::default();
        for entry in entries.values().filter(|entry| entry.is_live(now)) {
            stats.record(entry.attempt.status, 1);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payment::PaymentStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn attempt(id: &str) -> PaymentAttempt {
        PaymentAttempt::pending(
            id.to_string(),
            None,
            "254712345678".to_string(),
            dec!(50),
            "Order1".to_string(),
            Utc::now(),
        )
    }

    fn update(status: PaymentStatus, code: i64) -> TerminalUpdate {
        TerminalUpdate {
            status,
            result_code: code,
            result_description: None,
            receipt_number: None,
            callback_metadata: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        store.insert(attempt("ws_1")).await.unwrap();

        let found = store.find("ws_1").await.unwrap().unwrap();
        assert_eq!(found.status, PaymentStatus::Pending);
        assert!(store.find("ws_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        store.insert(attempt("ws_1")).await.unwrap();
        let err = store.insert(attempt("ws_1")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn complete_is_applied_once() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        store.insert(attempt("ws_1")).await.unwrap();

        let first = store.complete("ws_1", update(PaymentStatus::Success, 0)).await.unwrap();
        assert!(matches!(first, TransitionOutcome::Applied(ref a) if a.status == PaymentStatus::Success));

        let second = store.complete("ws_1", update(PaymentStatus::Failed, 1)).await.unwrap();
        match second {
            TransitionOutcome::AlreadyTerminal(a) => {
                assert_eq!(a.status, PaymentStatus::Success);
                assert_eq!(a.result_code, Some(0));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn complete_unknown_is_not_found() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        let outcome = store.complete("ws_x", update(PaymentStatus::Success, 0)).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::NotFound);
    }

    #[tokio::test]
    async fn concurrent_callbacks_apply_exactly_once() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        store.insert(attempt("ws_1")).await.unwrap();

        let mut handles = Vec::new();
        for code in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.complete("ws_1", update(PaymentStatus::Failed, code)).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if let TransitionOutcome::Applied(_) = handle.await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn release_only_evicts_terminal_entries() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        store.insert(attempt("ws_1")).await.unwrap();

        store.release("ws_1").await.unwrap();
        assert!(store.find("ws_1").await.unwrap().is_some());

        store.complete("ws_1", update(PaymentStatus::Cancelled, 1032)).await.unwrap();
        store.release("ws_1").await.unwrap();
        assert!(store.find("ws_1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        store.insert(attempt("ws_1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(store.find("ws_1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.find("ws_1").await.unwrap().is_none());
        assert_eq!(
            store.complete("ws_1", update(PaymentStatus::Success, 0)).await.unwrap(),
            TransitionOutcome::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_expired_entries() {
        let store = MemoryPaymentStore::new(Duration::from_secs(10));
        store.insert(attempt("ws_1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        store.insert(attempt("ws_2")).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn list_recent_is_newest_first() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        let mut older = attempt("ws_old");
        older.created_at = Utc::now() - chrono::Duration::minutes(2);
        store.insert(older).await.unwrap();
        store.insert(attempt("ws_new")).await.unwrap();

        let recent = store.list_recent(&PaymentFilter::default(), 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].checkout_request_id, "ws_new");
    }

    #[tokio::test]
    async fn list_recent_applies_filter() {
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        store.insert(attempt("ws_1")).await.unwrap();
        let mut other = attempt("ws_2");
        other.phone_number = "254799000111".to_string();
        store.insert(other).await.unwrap();
        store.complete("ws_1", update(PaymentStatus::Cancelled, 1032)).await.unwrap();

        let cancelled = PaymentFilter {
            status: Some(PaymentStatus::Cancelled),
            search: None,
        };
        let found = store.list_recent(&cancelled, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].checkout_request_id, "ws_1");

        let by_phone = PaymentFilter {
            status: None,
            search: Some("799000".to_string()),
        };
        let found = store.list_recent(&by_phone, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].checkout_request_id, "ws_2");
    }
}
