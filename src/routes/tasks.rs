//! Task ingestion and task management routes
//!
//! ## Routes
//!
//! - `POST /api/v1/tasks` - ingest a task request (402 challenge flow)
//! - `GET /api/v1/tasks/{id}` - task snapshot
//! - `PATCH /api/v1/tasks/{id}/status` - explicit pause/resume/closure
//! - `GET /api/v1/reconciliation` - captured settlements awaiting a task
//!
//! Ingestion headers: `X-Request-Id` carries the idempotency key (generated
//! and echoed back when absent); `X-Payment` carries the base64 JSON payment
//! authorization.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{error_response, json_response, ApiError};
use crate::db::schemas::{IngestionRecordDoc, TaskDoc, TaskStatus};
use crate::ingestion::{IngestionOutcome, TaskParams};
use crate::money;
use crate::payment::{PaymentAuthorization, PaymentRequirement};
use crate::server::AppState;
use crate::subtask::SubtaskDef;
use crate::types::TollgateError;

/// Parsed `/api/v1/tasks/...` route components
#[derive(Debug, PartialEq)]
pub enum TaskRoute<'a> {
    /// `/api/v1/tasks/{id}`
    Task(&'a str),
    /// `/api/v1/tasks/{id}/status`
    Status(&'a str),
    /// `/api/v1/tasks/{id}/submissions`
    Submissions(&'a str),
    /// `/api/v1/tasks/{id}/submissions/{participant}/rating`
    Rating(&'a str, &'a str),
}

impl<'a> TaskRoute<'a> {
    pub fn parse(path: &'a str) -> Option<Self> {
        let stripped = path.strip_prefix("/api/v1/tasks/")?;
        let parts: Vec<&str> = stripped.split('/').filter(|s| !s.is_empty()).collect();

        match parts.as_slice() {
            [id] => Some(Self::Task(id)),
            [id, "status"] => Some(Self::Status(id)),
            [id, "submissions"] => Some(Self::Submissions(id)),
            [id, "submissions", participant, "rating"] => Some(Self::Rating(id, participant)),
            _ => None,
        }
    }
}

/// Success body for ingestion
#[derive(Serialize)]
struct IngestResponse<'a> {
    task_id: &'a str,
    external_request_id: &'a str,
    settlement_ref: &'a str,
}

/// 402 challenge body
#[derive(Serialize)]
struct ChallengeResponse<'a> {
    error: &'a str,
    code: &'a str,
    external_request_id: &'a str,
    /// Requirements the caller may satisfy; single-asset for now
    accepts: Vec<&'a PaymentRequirement>,
}

/// Handle `POST /api/v1/tasks`
pub async fn handle_ingest(
    state: Arc<AppState>,
    request_id_header: Option<String>,
    payment_header: Option<String>,
    body: &[u8],
) -> Response<Full<Bytes>> {
    let params: TaskParams = match super::parse_body(body) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    // the idempotency key: caller-supplied, or generated and echoed back
    let external_request_id = request_id_header
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let authorization = match payment_header {
        Some(header) => match PaymentAuthorization::from_header(&header) {
            Ok(auth) => Some(auth),
            Err(e) => return error_response(&e),
        },
        None => None,
    };

    debug!(
        external_request_id = %external_request_id,
        has_payment = authorization.is_some(),
        "Ingestion request"
    );

    let outcome = state
        .orchestrator
        .ingest(&external_request_id, &params, authorization.as_ref())
        .await;

    match outcome {
        Ok(IngestionOutcome::PaymentRequired { requirement }) => json_response(
            StatusCode::PAYMENT_REQUIRED,
            &ChallengeResponse {
                error: "payment required",
                code: "PAYMENT_REQUIRED",
                external_request_id: &external_request_id,
                accepts: vec![&requirement],
            },
        ),
        Ok(IngestionOutcome::Created {
            task_id,
            external_request_id,
            settlement_ref,
        }) => json_response(
            StatusCode::CREATED,
            &IngestResponse {
                task_id: &task_id,
                external_request_id: &external_request_id,
                settlement_ref: &settlement_ref,
            },
        ),
        Ok(IngestionOutcome::Replayed {
            task_id,
            external_request_id,
            settlement_ref,
        }) => json_response(
            StatusCode::OK,
            &IngestResponse {
                task_id: &task_id,
                external_request_id: &external_request_id,
                settlement_ref: &settlement_ref,
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// Task snapshot returned to callers; amounts rendered as decimal strings
#[derive(Serialize)]
struct TaskView {
    task_id: String,
    status: TaskStatus,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    criteria: Option<String>,
    max_participants: u32,
    participant_count: u32,
    base_reward: String,
    max_bonus: String,
    asset: String,
    subtasks: Vec<SubtaskDef>,
    settlement_ref: String,
}

impl TaskView {
    fn from_doc(task: TaskDoc, decimals: u32) -> Self {
        Self {
            task_id: task.task_id,
            status: task.status,
            prompt: task.prompt,
            criteria: task.criteria,
            max_participants: task.max_participants,
            participant_count: task.participant_count,
            base_reward: money::format_minor(task.base_reward_minor, decimals),
            max_bonus: money::format_minor(task.max_bonus_minor, decimals),
            asset: task.asset,
            subtasks: task.subtasks,
            settlement_ref: task.settlement_ref,
        }
    }
}

/// Handle `GET /api/v1/tasks/{id}`
pub async fn handle_get_task(state: Arc<AppState>, task_id: &str) -> Response<Full<Bytes>> {
    match state.store.get_task(task_id).await {
        Ok(Some(task)) => json_response(
            StatusCode::OK,
            &TaskView::from_doc(task, state.args.asset_decimals),
        ),
        Ok(None) => error_response(&TollgateError::NotFound(format!("task {task_id}"))),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct StatusChangeRequest {
    status: TaskStatus,
}

/// Handle `PATCH /api/v1/tasks/{id}/status`
///
/// Explicit closure and pause/resume. `Completed` is terminal and
/// `PendingPayment` is never a persistable target.
pub async fn handle_status_change(
    state: Arc<AppState>,
    task_id: &str,
    body: &[u8],
) -> Response<Full<Bytes>> {
    let change: StatusChangeRequest = match super::parse_body(body) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };

    if change.status == TaskStatus::PendingPayment {
        return error_response(&TollgateError::InvalidParameters(
            "pending_payment is not a settable status".into(),
        ));
    }

    let task = match state.store.get_task(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return error_response(&TollgateError::NotFound(format!("task {task_id}"))),
        Err(e) => return error_response(&e),
    };

    if task.status == TaskStatus::Completed {
        return error_response(&TollgateError::InvalidParameters(
            "task is completed; status is terminal".into(),
        ));
    }

    match state.store.set_task_status(task_id, change.status).await {
        Ok(()) => match state.store.get_task(task_id).await {
            Ok(Some(updated)) => json_response(
                StatusCode::OK,
                &TaskView::from_doc(updated, state.args.asset_decimals),
            ),
            Ok(None) => error_response(&TollgateError::NotFound(format!("task {task_id}"))),
            Err(e) => error_response(&e),
        },
        Err(e) => error_response(&e),
    }
}

/// Operator view of a captured settlement with no task
#[derive(Serialize)]
struct ReconciliationView {
    external_request_id: String,
    settlement_ref: String,
    captured: String,
    asset: String,
    payer: String,
}

impl ReconciliationView {
    fn from_doc(record: IngestionRecordDoc, decimals: u32) -> Self {
        Self {
            external_request_id: record.external_request_id,
            settlement_ref: record.settlement_ref,
            captured: money::format_minor(record.captured_minor, decimals),
            asset: record.requirement.asset,
            payer: record.payer,
        }
    }
}

/// Handle `GET /api/v1/reconciliation`
pub async fn handle_reconciliation_list(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.orchestrator.reconciliation_queue().await {
        Ok(records) => {
            let views: Vec<ReconciliationView> = records
                .into_iter()
                .map(|r| ReconciliationView::from_doc(r, state.args.asset_decimals))
                .collect();
            json_response(StatusCode::OK, &views)
        }
        Err(e) => error_response(&e),
    }
}

/// 405 for known paths with the wrong method
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ApiError {
            error: "method not allowed".into(),
            code: "METHOD_NOT_ALLOWED",
        },
    )
}
