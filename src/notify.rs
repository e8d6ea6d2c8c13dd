//! Notification and reputation collaborators
//!
//! Invoked after a submission is rated, carrying the final reward and score.
//! Both are fire-and-report: a failure here is logged and reported upstream
//! as telemetry, never rolled back into the submission's recorded reward.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::types::{Result, TollgateError};

/// What the collaborators are told about a rated submission
#[derive(Debug, Clone, Serialize)]
pub struct RatingEvent {
    pub task_id: String,
    pub submission_id: String,
    pub participant_id: String,
    pub quality_score: u8,
    #[serde(with = "crate::money::minor_string")]
    pub reward_minor: u64,
    pub asset: String,
    pub rated_at: DateTime<Utc>,
}

/// Delivers "your submission was rated" messages
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn submission_rated(&self, event: &RatingEvent) -> Result<()>;
}

/// Appends score/reward facts to an external reputation ledger
#[async_trait]
pub trait ReputationSink: Send + Sync {
    async fn record_rating(&self, event: &RatingEvent) -> Result<()>;
}

/// Used when no collaborator endpoint is configured
pub struct Noop;

#[async_trait]
impl Notifier for Noop {
    async fn submission_rated(&self, event: &RatingEvent) -> Result<()> {
        debug!(task_id = %event.task_id, "No notifier configured, skipping");
        Ok(())
    }
}

#[async_trait]
impl ReputationSink for Noop {
    async fn record_rating(&self, event: &RatingEvent) -> Result<()> {
        debug!(task_id = %event.task_id, "No reputation sink configured, skipping");
        Ok(())
    }
}

/// Webhook delivery: POSTs the rating event as JSON to a configured URL
pub struct Webhook {
    client: reqwest::Client,
    url: String,
}

impl Webhook {
    pub fn new(url: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TollgateError::Internal(format!("webhook client build: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn post(&self, event: &RatingEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| TollgateError::Internal(format!("webhook post: {e}")))?;

        if !response.status().is_success() {
            return Err(TollgateError::Internal(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for Webhook {
    async fn submission_rated(&self, event: &RatingEvent) -> Result<()> {
        self.post(event).await
    }
}

#[async_trait]
impl ReputationSink for Webhook {
    async fn record_rating(&self, event: &RatingEvent) -> Result<()> {
        self.post(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> RatingEvent {
        RatingEvent {
            task_id: "t1".into(),
            submission_id: "s1".into(),
            participant_id: "alice".into(),
            quality_score: 8,
            reward_minor: 580_000,
            asset: "usdc".into(),
            rated_at: Utc::now(),
        }
    }

    #[test]
    fn test_noop_accepts_everything() {
        let ev = event();
        tokio_test::block_on(async {
            assert!(Noop.submission_rated(&ev).await.is_ok());
            assert!(Noop.record_rating(&ev).await.is_ok());
        });
    }

    #[test]
    fn test_event_serializes_reward_as_string() {
        let value = serde_json::to_value(event()).unwrap();
        assert_eq!(value["reward_minor"], "580000");
        assert_eq!(value["quality_score"], 8);
    }
}
