//! Ingestion orchestrator
//!
//! Composes pricing, verification, and materialization into the per-request
//! state machine. For any external request id, at most one settlement ever
//! succeeds and at most one task is ever created; everything here exists to
//! keep those two invariants under retries, races, and partial failures.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{IdempotencyLedger, IngestionOutcome, TaskParams};
use crate::db::schemas::{IngestionRecordDoc, IngestionStatus, Metadata, TaskDoc, TaskStatus};
use crate::db::TaskStore;
use crate::money;
use crate::payment::{PaymentAuthorization, PaymentRequirement, PaymentVerifier};
use crate::pricing::{self, PricingConfig};
use crate::types::{Result, TollgateError};

pub struct IngestOrchestrator {
    store: Arc<dyn TaskStore>,
    verifier: PaymentVerifier,
    pricing: PricingConfig,
    ledger: IdempotencyLedger,
}

impl IngestOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        verifier: PaymentVerifier,
        pricing: PricingConfig,
        attempt_log_ttl: Duration,
    ) -> Self {
        Self {
            store,
            verifier,
            pricing,
            ledger: IdempotencyLedger::new(attempt_log_ttl),
        }
    }

    /// Run the ingestion state machine for one external request id.
    ///
    /// Serialized per key: a concurrent call with the same id waits for this
    /// one's outcome and then reads it back as a replay instead of settling
    /// a second time.
    pub async fn ingest(
        &self,
        external_request_id: &str,
        params: &TaskParams,
        authorization: Option<&PaymentAuthorization>,
    ) -> Result<IngestionOutcome> {
        params.validate()?;
        let requirement = pricing::compute_price(
            &self.pricing,
            params.max_participants,
            &params.reward_per_participant,
            &params.bonus_per_participant,
            Utc::now(),
        )?;

        let lock = self.ledger.key_lock(external_request_id);
        let _guard = lock.lock().await;

        // 1. Lookup: a recorded outcome wins before any settlement work
        if let Some(record) = self.store.find_ingestion(external_request_id).await? {
            return self
                .resume_recorded(external_request_id, params, &requirement, record)
                .await;
        }

        // 2. Price: without proof of payment, answer with the challenge and
        //    leave no trace - no side effect until a real attempt is made
        let Some(authorization) = authorization else {
            debug!(
                external_request_id,
                amount_minor = requirement.amount_minor,
                "No payment presented, issuing challenge"
            );
            return Ok(IngestionOutcome::PaymentRequired { requirement });
        };

        // 3. Verify and settle; failures stay off the durable ledger
        let receipt = match self
            .verifier
            .verify_and_settle(&requirement, authorization)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.ledger.note_failure(external_request_id, e.code());
                info!(
                    external_request_id,
                    code = e.code(),
                    "Settlement attempt failed"
                );
                return Err(e);
            }
        };

        // 4. Money moved; from here every path must leave a durable record
        match self.materialize(external_request_id, params, &requirement, &receipt.reference) {
            Ok(task) => match self.store.insert_task(task.clone()).await {
                Ok(()) => {
                    self.record_outcome(
                        external_request_id,
                        &requirement,
                        &receipt.reference,
                        receipt.captured_minor,
                        &authorization.payer,
                        Some(&task.task_id),
                    )
                    .await?;
                    info!(
                        external_request_id,
                        task_id = %task.task_id,
                        settlement_ref = %receipt.reference,
                        "Task materialized"
                    );
                    Ok(IngestionOutcome::Created {
                        task_id: task.task_id,
                        external_request_id: external_request_id.to_string(),
                        settlement_ref: receipt.reference,
                    })
                }
                Err(create_err) => {
                    error!(
                        external_request_id,
                        settlement_ref = %receipt.reference,
                        error = %create_err,
                        "Payment captured but task creation failed; reconciliation required"
                    );
                    self.record_outcome(
                        external_request_id,
                        &requirement,
                        &receipt.reference,
                        receipt.captured_minor,
                        &authorization.payer,
                        None,
                    )
                    .await?;
                    Err(TollgateError::ReconciliationRequired(
                        external_request_id.to_string(),
                    ))
                }
            },
            Err(e) => {
                // building the document is pure; a failure here is caller
                // input that slipped past validation, still post-capture
                error!(
                    external_request_id,
                    settlement_ref = %receipt.reference,
                    error = %e,
                    "Payment captured but task parameters unusable; reconciliation required"
                );
                self.record_outcome(
                    external_request_id,
                    &requirement,
                    &receipt.reference,
                    receipt.captured_minor,
                    &authorization.payer,
                    None,
                )
                .await?;
                Err(TollgateError::ReconciliationRequired(
                    external_request_id.to_string(),
                ))
            }
        }
    }

    /// Records awaiting operator attention
    pub async fn reconciliation_queue(&self) -> Result<Vec<IngestionRecordDoc>> {
        self.store.list_reconciliation().await
    }

    /// Replay a recorded outcome, finishing materialization if the original
    /// attempt captured money without creating the task. Never re-settles.
    async fn resume_recorded(
        &self,
        external_request_id: &str,
        params: &TaskParams,
        requirement: &PaymentRequirement,
        record: IngestionRecordDoc,
    ) -> Result<IngestionOutcome> {
        if let (IngestionStatus::Settled, Some(task_id)) = (record.status, record.task_id.clone())
        {
            debug!(
                external_request_id,
                task_id = %task_id,
                "Replay of completed ingestion"
            );
            return Ok(IngestionOutcome::Replayed {
                task_id,
                external_request_id: external_request_id.to_string(),
                settlement_ref: record.settlement_ref,
            });
        }

        // the retry must describe the task the settled amount paid for
        if requirement.amount_minor != record.requirement.amount_minor {
            return Err(TollgateError::InvalidParameters(format!(
                "parameters price to {} but the settled requirement was {}",
                requirement.amount_minor, record.requirement.amount_minor
            )));
        }

        info!(
            external_request_id,
            settlement_ref = %record.settlement_ref,
            "Resuming reconciliation: settlement exists, creating task only"
        );
        let task = self.materialize(
            external_request_id,
            params,
            &record.requirement,
            &record.settlement_ref,
        )?;
        self.store.insert_task(task.clone()).await?;
        self.store
            .set_ingestion_task(external_request_id, &task.task_id)
            .await?;
        info!(
            external_request_id,
            task_id = %task.task_id,
            "Reconciliation completed"
        );
        Ok(IngestionOutcome::Created {
            task_id: task.task_id,
            external_request_id: external_request_id.to_string(),
            settlement_ref: record.settlement_ref,
        })
    }

    /// Build the task document from the paid-for parameters
    fn materialize(
        &self,
        external_request_id: &str,
        params: &TaskParams,
        requirement: &PaymentRequirement,
        settlement_ref: &str,
    ) -> Result<TaskDoc> {
        let decimals = self.pricing.asset.decimals;
        Ok(TaskDoc {
            _id: None,
            metadata: Metadata::new(),
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Active,
            prompt: params.prompt.clone(),
            criteria: params.criteria.clone(),
            max_participants: params.max_participants,
            participant_count: 0,
            base_reward_minor: money::parse_decimal(&params.reward_per_participant, decimals)?,
            max_bonus_minor: money::parse_decimal(&params.bonus_per_participant, decimals)?,
            asset: requirement.asset.clone(),
            subtasks: params.subtasks.clone(),
            external_request_id: external_request_id.to_string(),
            settlement_ref: settlement_ref.to_string(),
        })
    }

    async fn record_outcome(
        &self,
        external_request_id: &str,
        requirement: &PaymentRequirement,
        settlement_ref: &str,
        captured_minor: u64,
        payer: &str,
        task_id: Option<&str>,
    ) -> Result<()> {
        let record = IngestionRecordDoc {
            _id: None,
            metadata: Metadata::new(),
            external_request_id: external_request_id.to_string(),
            status: match task_id {
                Some(_) => IngestionStatus::Settled,
                None => IngestionStatus::ReconciliationRequired,
            },
            requirement: requirement.clone(),
            settlement_ref: settlement_ref.to_string(),
            captured_minor,
            payer: payer.to_string(),
            task_id: task_id.map(str::to_string),
        };

        match self.store.try_insert_ingestion(record).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                // another process holds the record despite our local lock;
                // the unique index arbitrated, their record stands
                warn!(
                    external_request_id,
                    "Ingestion record already present, keeping existing"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    external_request_id,
                    settlement_ref,
                    error = %e,
                    "Failed to write ingestion record for captured settlement"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::SubmissionDoc;
    use crate::db::MemoryStore;
    use crate::money::AssetConfig;
    use crate::payment::facilitator::MockFacilitator;
    use crate::payment::SCHEME_EXACT;
    use crate::subtask::{SubtaskDef, SubtaskType};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pricing_config() -> PricingConfig {
        PricingConfig {
            asset: AssetConfig {
                asset: "usdc".into(),
                network: "base-sepolia".into(),
                decimals: 6,
                pay_to: "0xgate".into(),
            },
            fee_bps: 100,
            requirement_ttl_secs: 600,
        }
    }

    fn params() -> TaskParams {
        TaskParams {
            prompt: "Review this summary".into(),
            criteria: Some("accuracy".into()),
            max_participants: 5,
            reward_per_participant: "0.80".into(),
            bonus_per_participant: "0.10".into(),
            subtasks: vec![SubtaskDef {
                id: "q1".into(),
                prompt: "Rate it".into(),
                kind: SubtaskType::Rating { min: 1, max: 5 },
            }],
        }
    }

    fn authorization(amount_minor: u64, nonce: &str) -> PaymentAuthorization {
        PaymentAuthorization {
            scheme: SCHEME_EXACT.into(),
            asset: "usdc".into(),
            network: "base-sepolia".into(),
            payer: "0xpayer".into(),
            pay_to: "0xgate".into(),
            amount_minor,
            valid_before: Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap(),
            nonce: nonce.into(),
            signature: "sig".into(),
        }
    }

    fn orchestrator(
        store: Arc<dyn TaskStore>,
        facilitator: Arc<MockFacilitator>,
    ) -> IngestOrchestrator {
        IngestOrchestrator::new(
            store,
            PaymentVerifier::new(facilitator),
            pricing_config(),
            Duration::from_secs(60),
        )
    }

    /// Store wrapper that fails the first N task inserts, for driving the
    /// reconciliation path
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicUsize,
    }

    impl FlakyStore {
        fn failing_once() -> Self {
            Self {
                inner: MemoryStore::new(),
                failures_left: AtomicUsize::new(1),
            }
        }
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn find_ingestion(&self, id: &str) -> crate::types::Result<Option<IngestionRecordDoc>> {
            self.inner.find_ingestion(id).await
        }
        async fn try_insert_ingestion(&self, r: IngestionRecordDoc) -> crate::types::Result<bool> {
            self.inner.try_insert_ingestion(r).await
        }
        async fn set_ingestion_task(&self, id: &str, task_id: &str) -> crate::types::Result<()> {
            self.inner.set_ingestion_task(id, task_id).await
        }
        async fn list_reconciliation(&self) -> crate::types::Result<Vec<IngestionRecordDoc>> {
            self.inner.list_reconciliation().await
        }
        async fn insert_task(&self, task: TaskDoc) -> crate::types::Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TollgateError::Database("injected task insert failure".into()));
            }
            self.inner.insert_task(task).await
        }
        async fn get_task(&self, id: &str) -> crate::types::Result<Option<TaskDoc>> {
            self.inner.get_task(id).await
        }
        async fn set_task_status(&self, id: &str, s: TaskStatus) -> crate::types::Result<()> {
            self.inner.set_task_status(id, s).await
        }
        async fn claim_seat(&self, id: &str) -> crate::types::Result<TaskDoc> {
            self.inner.claim_seat(id).await
        }
        async fn release_seat(&self, id: &str) -> crate::types::Result<()> {
            self.inner.release_seat(id).await
        }
        async fn insert_submission(&self, s: SubmissionDoc) -> crate::types::Result<()> {
            self.inner.insert_submission(s).await
        }
        async fn get_submission(
            &self,
            t: &str,
            p: &str,
        ) -> crate::types::Result<Option<SubmissionDoc>> {
            self.inner.get_submission(t, p).await
        }
        async fn apply_rating(
            &self,
            t: &str,
            p: &str,
            score: u8,
            reward: u64,
            by: &str,
        ) -> crate::types::Result<SubmissionDoc> {
            self.inner.apply_rating(t, p, score, reward, by).await
        }
    }

    #[tokio::test]
    async fn test_challenge_without_payment_leaves_no_trace() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        let orch = orchestrator(store.clone(), facilitator.clone());

        let outcome = orch.ingest("req-1", &params(), None).await.unwrap();
        match outcome {
            IngestionOutcome::PaymentRequired { requirement } => {
                // 5 x 0.90 = 4.50, +1% = 4.545
                assert_eq!(requirement.amount_minor, 4_545_000);
                assert_eq!(requirement.pay_to, "0xgate");
            }
            other => panic!("expected challenge, got {other:?}"),
        }

        assert_eq!(facilitator.settle_calls(), 0);
        assert!(store.find_ingestion("req-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settlement_creates_task_and_record() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        facilitator.push_success("tx-1").await;
        let orch = orchestrator(store.clone(), facilitator.clone());

        let auth = authorization(4_545_000, "n1");
        let outcome = orch.ingest("req-1", &params(), Some(&auth)).await.unwrap();

        let (task_id, settlement_ref) = match outcome {
            IngestionOutcome::Created {
                task_id,
                settlement_ref,
                ..
            } => (task_id, settlement_ref),
            other => panic!("expected created, got {other:?}"),
        };
        assert_eq!(settlement_ref, "tx-1");

        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.max_participants, 5);
        assert_eq!(task.base_reward_minor, 800_000);
        assert_eq!(task.max_bonus_minor, 100_000);
        assert_eq!(task.settlement_ref, "tx-1");

        let record = store.find_ingestion("req-1").await.unwrap().unwrap();
        assert_eq!(record.status, IngestionStatus::Settled);
        assert_eq!(record.task_id.as_deref(), Some(task_id.as_str()));
        assert_eq!(record.captured_minor, 4_545_000);
    }

    #[tokio::test]
    async fn test_second_ingest_replays_without_resettling() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        facilitator.push_success("tx-1").await;
        let orch = orchestrator(store.clone(), facilitator.clone());

        let auth = authorization(4_545_000, "n1");
        let first = orch.ingest("req-1", &params(), Some(&auth)).await.unwrap();
        let second = orch.ingest("req-1", &params(), Some(&auth)).await.unwrap();

        let first_task = match first {
            IngestionOutcome::Created { task_id, .. } => task_id,
            other => panic!("expected created, got {other:?}"),
        };
        match second {
            IngestionOutcome::Replayed {
                task_id,
                settlement_ref,
                ..
            } => {
                assert_eq!(task_id, first_task);
                assert_eq!(settlement_ref, "tx-1");
            }
            other => panic!("expected replay, got {other:?}"),
        }
        // exactly one settlement across both calls
        assert_eq!(facilitator.settle_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_id_settles_once() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        let orch = Arc::new(orchestrator(store.clone(), facilitator.clone()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let orch = Arc::clone(&orch);
            handles.push(tokio::spawn(async move {
                let auth = authorization(4_545_000, "n1");
                orch.ingest("req-1", &params(), Some(&auth)).await
            }));
        }

        let mut task_ids = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                IngestionOutcome::Created { task_id, .. }
                | IngestionOutcome::Replayed { task_id, .. } => task_ids.push(task_id),
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(facilitator.settle_calls(), 1);
        task_ids.dedup();
        assert_eq!(task_ids.len(), 1, "all callers must see the same task");
    }

    #[tokio::test]
    async fn test_failed_settlement_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        facilitator
            .push_failure(TollgateError::InsufficientFunds)
            .await;
        let orch = orchestrator(store.clone(), facilitator.clone());

        let auth = authorization(4_545_000, "n1");
        let err = orch
            .ingest("req-1", &params(), Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::InsufficientFunds));
        assert!(store.find_ingestion("req-1").await.unwrap().is_none());

        // the attempt shows up in the short-lived log only
        assert_eq!(
            orch.ledger.recent_failure("req-1").unwrap().code,
            "INSUFFICIENT_FUNDS"
        );

        // retry with a corrected authorization succeeds fresh
        facilitator.push_success("tx-2").await;
        let outcome = orch.ingest("req-1", &params(), Some(&auth)).await.unwrap();
        assert!(matches!(outcome, IngestionOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_mismatched_amount_rejected_before_settling() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        let orch = orchestrator(store.clone(), facilitator.clone());

        // overpayment is a mismatch too
        let auth = authorization(9_999_999, "n1");
        let err = orch
            .ingest("req-1", &params(), Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::PaymentMismatch(_)));
        assert_eq!(facilitator.settle_calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_failure_and_retriable() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        facilitator.push_failure(TollgateError::Timeout).await;
        let orch = orchestrator(store.clone(), facilitator.clone());

        let auth = authorization(4_545_000, "n1");
        let err = orch
            .ingest("req-1", &params(), Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::Timeout));
        assert!(err.payment_retriable());
        assert!(store.find_ingestion("req-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconciliation_after_task_creation_failure() {
        let store = Arc::new(FlakyStore::failing_once());
        let facilitator = Arc::new(MockFacilitator::new());
        facilitator.push_success("tx-1").await;
        let orch = orchestrator(store.clone(), facilitator.clone());

        let auth = authorization(4_545_000, "n1");
        let err = orch
            .ingest("req-1", &params(), Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::ReconciliationRequired(_)));

        // capture is anchored: record exists with the reference, no task
        let record = store.find_ingestion("req-1").await.unwrap().unwrap();
        assert_eq!(record.status, IngestionStatus::ReconciliationRequired);
        assert_eq!(record.settlement_ref, "tx-1");
        assert!(record.task_id.is_none());
        assert_eq!(orch.reconciliation_queue().await.unwrap().len(), 1);

        // retry finishes materialization without a second settlement
        let outcome = orch.ingest("req-1", &params(), Some(&auth)).await.unwrap();
        let task_id = match outcome {
            IngestionOutcome::Created {
                task_id,
                settlement_ref,
                ..
            } => {
                assert_eq!(settlement_ref, "tx-1");
                task_id
            }
            other => panic!("expected created, got {other:?}"),
        };
        assert_eq!(facilitator.settle_calls(), 1);

        let record = store.find_ingestion("req-1").await.unwrap().unwrap();
        assert_eq!(record.status, IngestionStatus::Settled);
        assert_eq!(record.task_id.as_deref(), Some(task_id.as_str()));
        assert!(orch.reconciliation_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconciliation_retry_rejects_drifted_params() {
        let store = Arc::new(FlakyStore::failing_once());
        let facilitator = Arc::new(MockFacilitator::new());
        facilitator.push_success("tx-1").await;
        let orch = orchestrator(store.clone(), facilitator.clone());

        let auth = authorization(4_545_000, "n1");
        assert!(orch.ingest("req-1", &params(), Some(&auth)).await.is_err());

        // retrying with parameters that price differently must not produce
        // a task the settled amount never paid for
        let mut drifted = params();
        drifted.max_participants = 50;
        let err = orch
            .ingest("req-1", &drifted, Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::InvalidParameters(_)));
        assert_eq!(facilitator.settle_calls(), 1);

        // the original parameters still complete the reconciliation
        let outcome = orch.ingest("req-1", &params(), Some(&auth)).await.unwrap();
        assert!(matches!(outcome, IngestionOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_any_side_effect() {
        let store = Arc::new(MemoryStore::new());
        let facilitator = Arc::new(MockFacilitator::new());
        let orch = orchestrator(store.clone(), facilitator.clone());

        let mut bad = params();
        bad.reward_per_participant = "-1".into();
        let auth = authorization(4_545_000, "n1");
        let err = orch.ingest("req-1", &bad, Some(&auth)).await.unwrap_err();
        assert!(matches!(err, TollgateError::InvalidParameters(_)));
        assert_eq!(facilitator.settle_calls(), 0);
    }
}
