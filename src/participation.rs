//! Participation gate
//!
//! Admits responses into an active task. Capacity is enforced by a single
//! atomic check-and-increment in the store - never check-then-increment
//! across two steps - and the (task, participant) unique constraint makes
//! duplicate submissions lose deterministically, even when racing.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::schemas::{SubmissionDoc, TaskDoc, TaskStatus};
use crate::db::TaskStore;
use crate::subtask;
use crate::types::{Result, TollgateError};

pub struct ParticipationGate {
    store: Arc<dyn TaskStore>,
}

impl ParticipationGate {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Accept one participant's responses for a task.
    ///
    /// On success the participant counter has been incremented and the
    /// submission persisted in its unrated state. Scoring and reward happen
    /// later, through the rating service.
    pub async fn submit(
        &self,
        task_id: &str,
        participant_id: &str,
        responses: HashMap<String, Value>,
    ) -> Result<SubmissionDoc> {
        if participant_id.trim().is_empty() {
            return Err(TollgateError::InvalidParameters(
                "participant_id is empty".into(),
            ));
        }

        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| TollgateError::NotFound(format!("task {task_id}")))?;
        precheck(&task)?;

        subtask::validate_responses(&task.subtasks, &responses)?;

        // cheap early exit; the unique index is what actually decides races
        if self
            .store
            .get_submission(task_id, participant_id)
            .await?
            .is_some()
        {
            return Err(TollgateError::DuplicateSubmission);
        }

        let claimed = self.store.claim_seat(task_id).await?;

        let submission = SubmissionDoc::new(task_id, participant_id, responses);
        if let Err(e) = self.store.insert_submission(submission.clone()).await {
            // the seat was claimed but the submission lost (typically a
            // duplicate race); hand the seat back
            if let Err(release_err) = self.store.release_seat(task_id).await {
                warn!(
                    task_id,
                    participant_id,
                    error = %release_err,
                    "Failed to release seat after losing submission insert"
                );
            }
            return Err(e);
        }

        info!(
            task_id,
            participant_id,
            participants = claimed.participant_count,
            max = claimed.max_participants,
            "Submission accepted"
        );

        if claimed.participant_count >= claimed.max_participants {
            if let Err(e) = self
                .store
                .set_task_status(task_id, TaskStatus::Completed)
                .await
            {
                warn!(task_id, error = %e, "Failed to mark filled task completed");
            } else {
                info!(task_id, "Task filled, marked completed");
            }
        }

        Ok(submission)
    }
}

/// Pre-read diagnosis, capacity first so a full task reports
/// `CapacityExceeded` even after its fill transition to completed
fn precheck(task: &TaskDoc) -> Result<()> {
    if task.participant_count >= task.max_participants {
        return Err(TollgateError::CapacityExceeded);
    }
    if task.status != TaskStatus::Active {
        return Err(TollgateError::TaskNotActive(task.status.as_str().into()));
    }
    Ok(())
}
