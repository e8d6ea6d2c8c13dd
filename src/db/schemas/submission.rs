//! Submission document schema
//!
//! At most one submission per (task, participant) pair, enforced by a unique
//! compound index. Quality score and reward are written exactly once by the
//! rating step and immutable afterward.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for submissions
pub const SUBMISSION_COLLECTION: &str = "submissions";

/// Submission document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SubmissionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Submission identifier (UUID)
    pub submission_id: String,

    pub task_id: String,

    pub participant_id: String,

    /// Raw response values keyed by subtask id, validated at submission time
    pub responses: HashMap<String, Value>,

    /// Null until rated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,

    /// Null until rated; written in the same update as the score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_minor: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated_at: Option<DateTime>,
}

impl SubmissionDoc {
    pub fn new(task_id: &str, participant_id: &str, responses: HashMap<String, Value>) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            submission_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            participant_id: participant_id.to_string(),
            responses,
            quality_score: None,
            reward_minor: None,
            rated_by: None,
            rated_at: None,
        }
    }

    /// Whether the rating step already ran for this submission
    pub fn is_rated(&self) -> bool {
        self.reward_minor.is_some()
    }
}

impl IntoIndexes for SubmissionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // one submission per (task, participant)
            (
                doc! { "task_id": 1, "participant_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("task_participant_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "submission_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("submission_id_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SubmissionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
