//! Idempotency ledger
//!
//! Per-external-request-id serialization and the short-lived failed-attempt
//! log. The durable half of the ledger is the `ingestion_records` collection
//! behind `TaskStore`; this type owns the in-process half: one async mutex
//! per key so concurrent ingestion calls with the same id wait for the
//! first outcome instead of racing to settle twice.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A recent settlement failure, kept only for diagnostics - never persisted
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub code: &'static str,
    pub at: Instant,
}

pub struct IdempotencyLedger {
    locks: DashMap<String, Arc<Mutex<()>>>,
    attempts: DashMap<String, FailedAttempt>,
    attempt_ttl: Duration,
}

impl IdempotencyLedger {
    pub fn new(attempt_ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            attempts: DashMap::new(),
            attempt_ttl,
        }
    }

    /// The mutex serializing all ingestion work for one external request id
    pub fn key_lock(&self, external_request_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(external_request_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Note a failed settlement attempt and prune stale entries
    pub fn note_failure(&self, external_request_id: &str, code: &'static str) {
        self.attempts.insert(
            external_request_id.to_string(),
            FailedAttempt {
                code,
                at: Instant::now(),
            },
        );
        self.prune();
    }

    pub fn recent_failure(&self, external_request_id: &str) -> Option<FailedAttempt> {
        self.attempts
            .get(external_request_id)
            .filter(|a| a.at.elapsed() < self.attempt_ttl)
            .map(|a| a.value().clone())
    }

    /// Drop expired attempt entries and locks nobody is holding
    fn prune(&self) {
        let ttl = self.attempt_ttl;
        self.attempts.retain(|_, attempt| attempt.at.elapsed() < ttl);
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_same_lock() {
        let ledger = IdempotencyLedger::new(Duration::from_secs(60));
        let a = ledger.key_lock("req-1");
        let b = ledger.key_lock("req-1");
        assert!(Arc::ptr_eq(&a, &b));
        let c = ledger.key_lock("req-2");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_failure_log_expires() {
        let ledger = IdempotencyLedger::new(Duration::from_millis(0));
        ledger.note_failure("req-1", "TIMEOUT");
        assert!(ledger.recent_failure("req-1").is_none());

        let ledger = IdempotencyLedger::new(Duration::from_secs(60));
        ledger.note_failure("req-1", "TIMEOUT");
        let attempt = ledger.recent_failure("req-1").unwrap();
        assert_eq!(attempt.code, "TIMEOUT");
    }

    #[test]
    fn test_unheld_locks_are_pruned() {
        let ledger = IdempotencyLedger::new(Duration::from_secs(60));
        {
            let _lock = ledger.key_lock("req-1");
            ledger.note_failure("other", "TIMEOUT");
            // still referenced, must survive the prune
            assert_eq!(ledger.locks.len(), 1);
        }
        ledger.note_failure("other", "TIMEOUT");
        assert!(ledger.locks.is_empty());
    }
}
