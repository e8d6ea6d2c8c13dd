//! Submission and rating routes
//!
//! ## Routes
//!
//! - `POST /api/v1/tasks/{id}/submissions` - submit responses through the
//!   participation gate
//! - `POST /api/v1/tasks/{id}/submissions/{participant}/rating` - apply a
//!   quality score and compute the payout

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{error_response, json_response};
use crate::db::schemas::SubmissionDoc;
use crate::money;
use crate::rating::RatingContext;
use crate::server::AppState;

#[derive(Deserialize)]
struct SubmitRequest {
    participant_id: String,
    responses: HashMap<String, Value>,
}

/// Submission as returned to callers
#[derive(Serialize)]
struct SubmissionView {
    submission_id: String,
    task_id: String,
    participant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reward: Option<String>,
}

impl SubmissionView {
    fn from_doc(submission: SubmissionDoc, decimals: u32) -> Self {
        Self {
            submission_id: submission.submission_id,
            task_id: submission.task_id,
            participant_id: submission.participant_id,
            quality_score: submission.quality_score,
            reward: submission
                .reward_minor
                .map(|minor| money::format_minor(minor, decimals)),
        }
    }
}

/// Handle `POST /api/v1/tasks/{id}/submissions`
pub async fn handle_submission(
    state: Arc<AppState>,
    task_id: &str,
    body: &[u8],
) -> Response<Full<Bytes>> {
    let request: SubmitRequest = match super::parse_body(body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    match state
        .gate
        .submit(task_id, &request.participant_id, request.responses)
        .await
    {
        Ok(submission) => json_response(
            StatusCode::CREATED,
            &SubmissionView::from_doc(submission, state.args.asset_decimals),
        ),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct RatingRequest {
    score: u8,
    rated_by: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Handle `POST /api/v1/tasks/{id}/submissions/{participant}/rating`
pub async fn handle_rating(
    state: Arc<AppState>,
    task_id: &str,
    participant_id: &str,
    body: &[u8],
) -> Response<Full<Bytes>> {
    let request: RatingRequest = match super::parse_body(body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    let ctx = RatingContext {
        score: request.score,
        rated_by: request.rated_by,
        notes: request.notes,
    };

    match state.rating.rate(task_id, participant_id, ctx).await {
        Ok(submission) => json_response(
            StatusCode::OK,
            &SubmissionView::from_doc(submission, state.args.asset_decimals),
        ),
        Err(e) => error_response(&e),
    }
}
