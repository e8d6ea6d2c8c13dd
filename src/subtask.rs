//! Subtask definitions and response validation
//!
//! Each subtask carries a tagged type variant with its own validation
//! contract. Responses arrive as raw JSON values keyed by subtask id; the
//! variant decides whether a value is acceptable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::{Result, TollgateError};

/// A single unit of work inside a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskDef {
    /// Identifier unique within the task, referenced by response keys
    pub id: String,
    /// What the participant is asked to do
    pub prompt: String,
    #[serde(flatten)]
    pub kind: SubtaskType,
}

/// Tagged subtask variants, each with its own response contract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubtaskType {
    /// Free-form text answer
    FreeText {
        #[serde(default)]
        min_length: usize,
        #[serde(default = "default_max_length")]
        max_length: usize,
    },
    /// Exactly one option from a fixed list
    SingleChoice { options: Vec<String> },
    /// A bounded selection of options from a fixed list
    MultiChoice {
        options: Vec<String>,
        #[serde(default = "default_min_select")]
        min_select: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_select: Option<usize>,
    },
    /// An integer rating inside an inclusive range
    Rating { min: i64, max: i64 },
}

fn default_max_length() -> usize {
    10_000
}

fn default_min_select() -> usize {
    1
}

impl SubtaskType {
    /// Validate a raw response value against this variant's contract
    pub fn validate(&self, subtask_id: &str, value: &Value) -> Result<()> {
        match self {
            Self::FreeText {
                min_length,
                max_length,
            } => {
                let text = value.as_str().ok_or_else(|| {
                    invalid(subtask_id, "expected a string response")
                })?;
                if text.len() < *min_length {
                    return Err(invalid(
                        subtask_id,
                        &format!("response shorter than {min_length} characters"),
                    ));
                }
                if text.len() > *max_length {
                    return Err(invalid(
                        subtask_id,
                        &format!("response longer than {max_length} characters"),
                    ));
                }
                Ok(())
            }
            Self::SingleChoice { options } => {
                let choice = value.as_str().ok_or_else(|| {
                    invalid(subtask_id, "expected a string choice")
                })?;
                if !options.iter().any(|o| o == choice) {
                    return Err(invalid(subtask_id, &format!("'{choice}' is not an option")));
                }
                Ok(())
            }
            Self::MultiChoice {
                options,
                min_select,
                max_select,
            } => {
                let chosen = value.as_array().ok_or_else(|| {
                    invalid(subtask_id, "expected an array of choices")
                })?;
                let mut seen = Vec::with_capacity(chosen.len());
                for item in chosen {
                    let choice = item
                        .as_str()
                        .ok_or_else(|| invalid(subtask_id, "choices must be strings"))?;
                    if !options.iter().any(|o| o == choice) {
                        return Err(invalid(
                            subtask_id,
                            &format!("'{choice}' is not an option"),
                        ));
                    }
                    if seen.contains(&choice) {
                        return Err(invalid(subtask_id, &format!("'{choice}' selected twice")));
                    }
                    seen.push(choice);
                }
                if chosen.len() < *min_select {
                    return Err(invalid(
                        subtask_id,
                        &format!("fewer than {min_select} selections"),
                    ));
                }
                if let Some(max) = max_select {
                    if chosen.len() > *max {
                        return Err(invalid(subtask_id, &format!("more than {max} selections")));
                    }
                }
                Ok(())
            }
            Self::Rating { min, max } => {
                let score = value.as_i64().ok_or_else(|| {
                    invalid(subtask_id, "expected an integer rating")
                })?;
                if score < *min || score > *max {
                    return Err(invalid(
                        subtask_id,
                        &format!("rating {score} outside [{min},{max}]"),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn invalid(subtask_id: &str, detail: &str) -> TollgateError {
    TollgateError::InvalidParameters(format!("subtask '{subtask_id}': {detail}"))
}

/// Validate the full response map for a task: every subtask answered, no
/// unknown keys, each value acceptable to its variant.
pub fn validate_responses(
    subtasks: &[SubtaskDef],
    responses: &HashMap<String, Value>,
) -> Result<()> {
    for def in subtasks {
        let value = responses.get(&def.id).ok_or_else(|| {
            TollgateError::InvalidParameters(format!("missing response for subtask '{}'", def.id))
        })?;
        def.kind.validate(&def.id, value)?;
    }
    for key in responses.keys() {
        if !subtasks.iter().any(|d| &d.id == key) {
            return Err(TollgateError::InvalidParameters(format!(
                "response for unknown subtask '{key}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs() -> Vec<SubtaskDef> {
        vec![
            SubtaskDef {
                id: "clarity".into(),
                prompt: "Rate the clarity".into(),
                kind: SubtaskType::Rating { min: 1, max: 5 },
            },
            SubtaskDef {
                id: "summary".into(),
                prompt: "Summarize".into(),
                kind: SubtaskType::FreeText {
                    min_length: 3,
                    max_length: 100,
                },
            },
            SubtaskDef {
                id: "pick".into(),
                prompt: "Pick one".into(),
                kind: SubtaskType::SingleChoice {
                    options: vec!["a".into(), "b".into()],
                },
            },
        ]
    }

    fn good_responses() -> HashMap<String, Value> {
        HashMap::from([
            ("clarity".to_string(), json!(4)),
            ("summary".to_string(), json!("looks good")),
            ("pick".to_string(), json!("a")),
        ])
    }

    #[test]
    fn test_valid_responses_pass() {
        assert!(validate_responses(&defs(), &good_responses()).is_ok());
    }

    #[test]
    fn test_missing_response_rejected() {
        let mut responses = good_responses();
        responses.remove("summary");
        assert!(validate_responses(&defs(), &responses).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut responses = good_responses();
        responses.insert("extra".into(), json!("x"));
        assert!(validate_responses(&defs(), &responses).is_err());
    }

    #[test]
    fn test_rating_bounds() {
        let kind = SubtaskType::Rating { min: 1, max: 5 };
        assert!(kind.validate("r", &json!(1)).is_ok());
        assert!(kind.validate("r", &json!(5)).is_ok());
        assert!(kind.validate("r", &json!(0)).is_err());
        assert!(kind.validate("r", &json!(6)).is_err());
        assert!(kind.validate("r", &json!("high")).is_err());
    }

    #[test]
    fn test_multi_choice_rules() {
        let kind = SubtaskType::MultiChoice {
            options: vec!["x".into(), "y".into(), "z".into()],
            min_select: 1,
            max_select: Some(2),
        };
        assert!(kind.validate("m", &json!(["x"])).is_ok());
        assert!(kind.validate("m", &json!(["x", "z"])).is_ok());
        assert!(kind.validate("m", &json!([])).is_err());
        assert!(kind.validate("m", &json!(["x", "y", "z"])).is_err());
        assert!(kind.validate("m", &json!(["x", "x"])).is_err());
        assert!(kind.validate("m", &json!(["nope"])).is_err());
    }

    #[test]
    fn test_free_text_length() {
        let kind = SubtaskType::FreeText {
            min_length: 5,
            max_length: 10,
        };
        assert!(kind.validate("t", &json!("hello")).is_ok());
        assert!(kind.validate("t", &json!("hi")).is_err());
        assert!(kind.validate("t", &json!("hello world too long")).is_err());
    }

    #[test]
    fn test_tagged_serialization() {
        let def = SubtaskDef {
            id: "s".into(),
            prompt: "p".into(),
            kind: SubtaskType::SingleChoice {
                options: vec!["a".into()],
            },
        };
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "single_choice");
        let back: SubtaskDef = serde_json::from_value(value).unwrap();
        assert!(matches!(back.kind, SubtaskType::SingleChoice { .. }));
    }
}
