//! Task ingestion pipeline
//!
//! The 402 flow end to end: price the request, challenge for payment, settle
//! exactly once per external request id, and materialize exactly one task.

mod ledger;
mod orchestrator;

pub use ledger::IdempotencyLedger;
pub use orchestrator::IngestOrchestrator;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::payment::PaymentRequirement;
use crate::subtask::SubtaskDef;
use crate::types::{Result, TollgateError};

/// Economic and content parameters of an inbound task request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParams {
    /// What participants are asked to give feedback on
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,

    pub max_participants: u32,

    /// Guaranteed payout per participant, decimal string (e.g. "0.80")
    pub reward_per_participant: String,

    /// Per-participant bonus ceiling, decimal string
    #[serde(default = "zero_amount")]
    pub bonus_per_participant: String,

    pub subtasks: Vec<SubtaskDef>,
}

fn zero_amount() -> String {
    "0".to_string()
}

impl TaskParams {
    /// Structural validation; amount parsing happens in the pricing engine
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(TollgateError::InvalidParameters("prompt is empty".into()));
        }
        if self.max_participants == 0 {
            return Err(TollgateError::InvalidParameters(
                "max_participants must be positive".into(),
            ));
        }
        if self.subtasks.is_empty() {
            return Err(TollgateError::InvalidParameters(
                "task needs at least one subtask".into(),
            ));
        }
        let mut seen = HashSet::new();
        for subtask in &self.subtasks {
            if subtask.id.trim().is_empty() {
                return Err(TollgateError::InvalidParameters(
                    "subtask id is empty".into(),
                ));
            }
            if !seen.insert(subtask.id.as_str()) {
                return Err(TollgateError::InvalidParameters(format!(
                    "duplicate subtask id '{}'",
                    subtask.id
                )));
            }
        }
        Ok(())
    }
}

/// What an ingestion call resolves to
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestionOutcome {
    /// The protocol challenge: not an error, no side effect happened
    PaymentRequired { requirement: PaymentRequirement },
    /// Settlement captured and task materialized by this call
    Created {
        task_id: String,
        external_request_id: String,
        settlement_ref: String,
    },
    /// This external request id already produced a task; recorded result
    Replayed {
        task_id: String,
        external_request_id: String,
        settlement_ref: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtask::SubtaskType;

    fn params() -> TaskParams {
        TaskParams {
            prompt: "Review this summary".into(),
            criteria: None,
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

    #[test]
    fn test_valid_params() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_prompt() {
        let mut p = params();
        p.prompt = "  ".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_participants() {
        let mut p = params();
        p.max_participants = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_subtask_ids() {
        let mut p = params();
        p.subtasks.push(p.subtasks[0].clone());
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_rejects_no_subtasks() {
        let mut p = params();
        p.subtasks.clear();
        assert!(p.validate().is_err());
    }
}
