//! Store seam
//!
//! The persistence collaborator as the pipeline sees it: transactional
//! create/read operations plus the atomic primitives the concurrency model
//! depends on (unique-constraint insert, conditional seat increment,
//! rate-once update). Backed by MongoDB in production and by an in-memory
//! implementation in dev mode and tests.

use async_trait::async_trait;

use crate::db::schemas::{IngestionRecordDoc, SubmissionDoc, TaskDoc, TaskStatus};
use crate::types::Result;

#[async_trait]
pub trait TaskStore: Send + Sync {
    // --- ingestion records (idempotency ledger) ---

    async fn find_ingestion(&self, external_request_id: &str)
        -> Result<Option<IngestionRecordDoc>>;

    /// Unique-constraint insert. Returns `false` when a record for the same
    /// external request id already exists (a concurrent writer won the race);
    /// the caller re-reads and treats the stored record as authoritative.
    async fn try_insert_ingestion(&self, record: IngestionRecordDoc) -> Result<bool>;

    /// Complete a reconciliation-required record: attach the task id and
    /// flip the status to settled.
    async fn set_ingestion_task(&self, external_request_id: &str, task_id: &str) -> Result<()>;

    /// All records still awaiting reconciliation, for the operator surface
    async fn list_reconciliation(&self) -> Result<Vec<IngestionRecordDoc>>;

    // --- tasks ---

    async fn insert_task(&self, task: TaskDoc) -> Result<()>;

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskDoc>>;

    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// Atomic check-and-increment of the participant counter. Succeeds only
    /// while the task is active and below capacity, and returns the task as
    /// updated. Errors: `NotFound`, `TaskNotActive`, `CapacityExceeded`.
    async fn claim_seat(&self, task_id: &str) -> Result<TaskDoc>;

    /// Compensating decrement for a claim whose submission insert lost a
    /// duplicate race
    async fn release_seat(&self, task_id: &str) -> Result<()>;

    // --- submissions ---

    /// Insert honoring the (task, participant) unique constraint; a
    /// duplicate maps to `DuplicateSubmission`.
    async fn insert_submission(&self, submission: SubmissionDoc) -> Result<()>;

    async fn get_submission(
        &self,
        task_id: &str,
        participant_id: &str,
    ) -> Result<Option<SubmissionDoc>>;

    /// Write score and reward exactly once: the update is conditional on the
    /// submission being unrated. Errors: `NotFound`, `AlreadyRated`.
    async fn apply_rating(
        &self,
        task_id: &str,
        participant_id: &str,
        quality_score: u8,
        reward_minor: u64,
        rated_by: &str,
    ) -> Result<SubmissionDoc>;
}
