//! Ingestion record schema
//!
//! The durable idempotency anchor: one record per external request id,
//! created when a settlement attempt succeeds and read-only afterward. A
//! record carrying a settlement reference but no task id is in
//! `ReconciliationRequired` - money was captured, the task was not created,
//! and a retry must finish materialization without settling again.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::payment::PaymentRequirement;

/// Collection name for ingestion records
pub const INGESTION_COLLECTION: &str = "ingestion_records";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    /// Settlement captured and task materialized
    #[default]
    Settled,
    /// Settlement captured but task creation failed; operator-visible
    ReconciliationRequired,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settled => "settled",
            Self::ReconciliationRequired => "reconciliation_required",
        }
    }
}

/// Ingestion record stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IngestionRecordDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Idempotency key supplied by (or generated for) the caller
    pub external_request_id: String,

    pub status: IngestionStatus,

    /// Requirement the settled authorization was verified against
    pub requirement: PaymentRequirement,

    /// Facilitator transaction reference; proof the capture happened
    pub settlement_ref: String,

    /// Amount captured, in minor units
    pub captured_minor: u64,

    /// Paying address, kept for reconciliation and audit
    pub payer: String,

    /// Created task, or null while reconciliation is required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl IntoIndexes for IngestionRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // the idempotency guarantee lives here
            (
                doc! { "external_request_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("external_request_id_unique".to_string())
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

impl MutMetadata for IngestionRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
