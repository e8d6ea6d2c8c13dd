//! Database schemas
//!
//! MongoDB document structures for tasks, submissions, and ingestion
//! records, plus the shared metadata envelope.

mod ingestion;
mod submission;
mod task;

pub use ingestion::{IngestionRecordDoc, IngestionStatus, INGESTION_COLLECTION};
pub use submission::{SubmissionDoc, SUBMISSION_COLLECTION};
pub use task::{TaskDoc, TaskStatus, TASK_COLLECTION};

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Common metadata for all documents: creation, update, and soft-deletion
/// timestamps.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata stamped with the current time
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(DateTime::now()),
            created_at: Some(DateTime::now()),
        }
    }
}
