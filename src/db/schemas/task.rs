//! Task document schema
//!
//! A task exists only after its funding payment settled. The participant
//! counter is bounded by `max_participants` and only ever moves through the
//! store's atomic claim/release primitives.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::subtask::SubtaskDef;

/// Collection name for tasks
pub const TASK_COLLECTION: &str = "tasks";

/// Task lifecycle states
///
/// `PendingPayment` is the state a 402 challenge reports; it is never
/// persisted, since tasks are materialized only after capture. Transitions
/// are driven by participation (`Active` -> `Completed` on fill) and explicit
/// closure, never by payment retries.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    PendingPayment,
    Active,
    Completed,
    Paused,
}

impl TaskStatus {
    /// Canonical string form, matching the serde representation so query
    /// filters and serialized documents agree
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Paused => "paused",
        }
    }
}

/// Task document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TaskDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Task identifier (UUID)
    pub task_id: String,

    pub status: TaskStatus,

    /// What the buyer wants feedback on
    pub prompt: String,

    /// Optional evaluation criteria shown to participants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,

    pub max_participants: u32,

    /// Monotonically increasing, bounded by max_participants
    #[serde(default)]
    pub participant_count: u32,

    /// Guaranteed payout per participant, in minor units
    pub base_reward_minor: u64,

    /// Bonus ceiling per participant, in minor units
    pub max_bonus_minor: u64,

    /// Asset identifier rewards are denominated in
    pub asset: String,

    pub subtasks: Vec<SubtaskDef>,

    /// Idempotency key of the ingestion request that funded this task
    pub external_request_id: String,

    /// Facilitator transaction reference that paid for this task
    pub settlement_ref: String,
}

impl IntoIndexes for TaskDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "task_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("task_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for TaskDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_match_serde() {
        for status in [
            TaskStatus::PendingPayment,
            TaskStatus::Active,
            TaskStatus::Completed,
            TaskStatus::Paused,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
        }
    }
}
