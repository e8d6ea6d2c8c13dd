//! In-memory store
//!
//! Single-mutex implementation of `TaskStore`. Every operation holds the
//! state lock for its full duration, which makes the check-and-increment and
//! unique-insert primitives trivially atomic. Used in dev mode when MongoDB
//! is unreachable, and by the test suite.

use async_trait::async_trait;
use bson::DateTime;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::db::schemas::{IngestionRecordDoc, IngestionStatus, SubmissionDoc, TaskDoc, TaskStatus};
use crate::db::store::TaskStore;
use crate::types::{Result, TollgateError};

#[derive(Default)]
struct MemState {
    tasks: HashMap<String, TaskDoc>,
    submissions: HashMap<(String, String), SubmissionDoc>,
    ingestions: HashMap<String, IngestionRecordDoc>,
}

/// Dev-mode and test store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn find_ingestion(
        &self,
        external_request_id: &str,
    ) -> Result<Option<IngestionRecordDoc>> {
        let state = self.state.lock().await;
        Ok(state.ingestions.get(external_request_id).cloned())
    }

    async fn try_insert_ingestion(&self, record: IngestionRecordDoc) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.ingestions.contains_key(&record.external_request_id) {
            return Ok(false);
        }
        state
            .ingestions
            .insert(record.external_request_id.clone(), record);
        Ok(true)
    }

    async fn set_ingestion_task(&self, external_request_id: &str, task_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.ingestions.get_mut(external_request_id).ok_or_else(|| {
            TollgateError::NotFound(format!("ingestion record {external_request_id}"))
        })?;
        record.task_id = Some(task_id.to_string());
        record.status = IngestionStatus::Settled;
        record.metadata.updated_at = Some(DateTime::now());
        Ok(())
    }

    async fn list_reconciliation(&self) -> Result<Vec<IngestionRecordDoc>> {
        let state = self.state.lock().await;
        Ok(state
            .ingestions
            .values()
            .filter(|r| r.status == IngestionStatus::ReconciliationRequired)
            .cloned()
            .collect())
    }

    async fn insert_task(&self, task: TaskDoc) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.task_id) {
            return Err(TollgateError::Database(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        state.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskDoc>> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(task_id).cloned())
    }

    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TollgateError::NotFound(format!("task {task_id}")))?;
        task.status = status;
        task.metadata.updated_at = Some(DateTime::now());
        Ok(())
    }

    async fn claim_seat(&self, task_id: &str) -> Result<TaskDoc> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TollgateError::NotFound(format!("task {task_id}")))?;

        if task.participant_count >= task.max_participants {
            return Err(TollgateError::CapacityExceeded);
        }
        if task.status != TaskStatus::Active {
            return Err(TollgateError::TaskNotActive(task.status.as_str().into()));
        }
        task.participant_count += 1;
        task.metadata.updated_at = Some(DateTime::now());
        Ok(task.clone())
    }

    async fn release_seat(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TollgateError::NotFound(format!("task {task_id}")))?;
        task.participant_count = task.participant_count.saturating_sub(1);
        Ok(())
    }

    async fn insert_submission(&self, submission: SubmissionDoc) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (
            submission.task_id.clone(),
            submission.participant_id.clone(),
        );
        if state.submissions.contains_key(&key) {
            return Err(TollgateError::DuplicateSubmission);
        }
        state.submissions.insert(key, submission);
        Ok(())
    }

    async fn get_submission(
        &self,
        task_id: &str,
        participant_id: &str,
    ) -> Result<Option<SubmissionDoc>> {
        let state = self.state.lock().await;
        Ok(state
            .submissions
            .get(&(task_id.to_string(), participant_id.to_string()))
            .cloned())
    }

    async fn apply_rating(
        &self,
        task_id: &str,
        participant_id: &str,
        quality_score: u8,
        reward_minor: u64,
        rated_by: &str,
    ) -> Result<SubmissionDoc> {
        let mut state = self.state.lock().await;
        let key = (task_id.to_string(), participant_id.to_string());
        let submission = state.submissions.get_mut(&key).ok_or_else(|| {
            TollgateError::NotFound(format!("submission {task_id}/{participant_id}"))
        })?;

        if submission.is_rated() {
            return Err(TollgateError::AlreadyRated);
        }
        submission.quality_score = Some(quality_score);
        submission.reward_minor = Some(reward_minor);
        submission.rated_by = Some(rated_by.to_string());
        submission.rated_at = Some(DateTime::now());
        submission.metadata.updated_at = Some(DateTime::now());
        Ok(submission.clone())
    }
}
