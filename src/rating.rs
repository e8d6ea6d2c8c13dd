//! Rating service
//!
//! Turns a quality score into a bounded payout and writes both to the
//! submission exactly once. All rating state is request-scoped - the context
//! arrives with the call and dies with it, so rating stays stateless across
//! instances.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::schemas::SubmissionDoc;
use crate::db::TaskStore;
use crate::notify::{Notifier, RatingEvent, ReputationSink};
use crate::reward;
use crate::types::{Result, TollgateError};

/// Everything one rating call needs, passed per request
#[derive(Debug, Clone)]
pub struct RatingContext {
    /// Quality score in [1,10]
    pub score: u8,
    /// Who produced the score
    pub rated_by: String,
    /// Free-form rater notes, not used for payout
    pub notes: Option<String>,
}

pub struct RatingService {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    reputation: Arc<dyn ReputationSink>,
}

impl RatingService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        reputation: Arc<dyn ReputationSink>,
    ) -> Self {
        Self {
            store,
            notifier,
            reputation,
        }
    }

    /// Rate one submission. The store update is conditional on the
    /// submission being unrated, so a second call can never overwrite the
    /// recorded reward.
    pub async fn rate(
        &self,
        task_id: &str,
        participant_id: &str,
        ctx: RatingContext,
    ) -> Result<SubmissionDoc> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| TollgateError::NotFound(format!("task {task_id}")))?;

        let reward_minor =
            reward::compute_reward(task.base_reward_minor, task.max_bonus_minor, ctx.score)?;

        let submission = self
            .store
            .apply_rating(task_id, participant_id, ctx.score, reward_minor, &ctx.rated_by)
            .await?;

        info!(
            task_id,
            participant_id,
            score = ctx.score,
            reward_minor,
            "Submission rated"
        );

        let event = RatingEvent {
            task_id: task_id.to_string(),
            submission_id: submission.submission_id.clone(),
            participant_id: participant_id.to_string(),
            quality_score: ctx.score,
            reward_minor,
            asset: task.asset.clone(),
            rated_at: Utc::now(),
        };

        // fire-and-report: the reward above is already recorded and final
        if let Err(e) = self.notifier.submission_rated(&event).await {
            warn!(task_id, participant_id, error = %e, "Notification failed (non-fatal)");
        }
        if let Err(e) = self.reputation.record_rating(&event).await {
            warn!(task_id, participant_id, error = %e, "Reputation report failed (non-fatal)");
        }

        Ok(submission)
    }
}
