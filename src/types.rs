//! Shared error type and result alias
//!
//! Every failure the service can surface maps to one variant here, and every
//! variant carries a stable machine-readable code. Agent callers branch on the
//! code to decide whether to retry, re-sign, or abandon; the display text is
//! for humans and may change.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Service-wide error taxonomy
///
/// Settlement failures (`PaymentMismatch`, `Replayed`, `AuthorizationExpired`,
/// `InvalidSignature`, `InsufficientFunds`, `Timeout`) are caller-retriable
/// with a corrected authorization. `ReconciliationRequired` means money was
/// captured but the task was not materialized; it is durably recorded and
/// operator-visible, never silently dropped.
#[derive(Debug, Clone, Error)]
pub enum TollgateError {
    /// Bad input from the caller; never retried automatically
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Authorization does not match the computed requirement exactly
    /// (wrong asset, wrong payee, underpayment or overpayment)
    #[error("payment does not satisfy requirement: {0}")]
    PaymentMismatch(String),

    /// Authorization nonce was already consumed by a prior settlement
    #[error("payment authorization already settled")]
    Replayed,

    /// Authorization validity window has passed
    #[error("payment authorization expired")]
    AuthorizationExpired,

    /// Facilitator rejected the payer's signature
    #[error("payment authorization signature invalid")]
    InvalidSignature,

    /// Payer cannot cover the required amount
    #[error("insufficient funds for required amount")]
    InsufficientFunds,

    /// Settlement attempt timed out waiting on the facilitator.
    /// Safe to retry under the same external request id.
    #[error("settlement timed out")]
    Timeout,

    /// Facilitator failure that fits no finer category. The raw transport
    /// error is logged, never forwarded.
    #[error("settlement facilitator error: {0}")]
    Facilitator(String),

    /// Settlement succeeded but the task was not created
    #[error("payment captured but task not materialized (request {0})")]
    ReconciliationRequired(String),

    /// Task already has the maximum number of participants
    #[error("task capacity exceeded")]
    CapacityExceeded,

    /// Participant already submitted to this task
    #[error("duplicate submission for participant")]
    DuplicateSubmission,

    /// Quality score outside the accepted [1,10] range
    #[error("quality score {0} outside [1,10]")]
    InvalidScore(i64),

    /// Submission was already rated; reward is written exactly once
    #[error("submission already rated")]
    AlreadyRated,

    /// Task exists but is not accepting submissions
    #[error("task not accepting submissions (status {0})")]
    TaskNotActive(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TollgateError {
    /// Stable machine-readable reason code, distinct from the display text
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "INVALID_PARAMETERS",
            Self::PaymentMismatch(_) => "PAYMENT_MISMATCH",
            Self::Replayed => "REPLAYED",
            Self::AuthorizationExpired => "AUTHORIZATION_EXPIRED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::Timeout => "TIMEOUT",
            Self::Facilitator(_) => "FACILITATOR_ERROR",
            Self::ReconciliationRequired(_) => "RECONCILIATION_REQUIRED",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::DuplicateSubmission => "DUPLICATE_SUBMISSION",
            Self::InvalidScore(_) => "INVALID_SCORE",
            Self::AlreadyRated => "ALREADY_RATED",
            Self::TaskNotActive(_) => "TASK_NOT_ACTIVE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller may retry after correcting the payment authorization
    pub fn payment_retriable(&self) -> bool {
        matches!(
            self,
            Self::PaymentMismatch(_)
                | Self::AuthorizationExpired
                | Self::InvalidSignature
                | Self::InsufficientFunds
                | Self::Timeout
                | Self::Facilitator(_)
        )
    }

    /// HTTP status code this error maps to on the wire
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidParameters(_) | Self::InvalidScore(_) => 400,
            Self::PaymentMismatch(_)
            | Self::AuthorizationExpired
            | Self::InvalidSignature
            | Self::InsufficientFunds => 402,
            Self::Replayed
            | Self::CapacityExceeded
            | Self::DuplicateSubmission
            | Self::AlreadyRated
            | Self::TaskNotActive(_) => 409,
            Self::NotFound(_) => 404,
            Self::Timeout => 504,
            Self::Facilitator(_) => 502,
            Self::ReconciliationRequired(_) | Self::Database(_) | Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(TollgateError::Replayed.code(), "REPLAYED");
        assert_eq!(TollgateError::Timeout.code(), "TIMEOUT");
        assert_eq!(
            TollgateError::ReconciliationRequired("req-1".into()).code(),
            "RECONCILIATION_REQUIRED"
        );
    }

    #[test]
    fn test_payment_retriable() {
        assert!(TollgateError::Timeout.payment_retriable());
        assert!(TollgateError::InsufficientFunds.payment_retriable());
        assert!(!TollgateError::DuplicateSubmission.payment_retriable());
        assert!(!TollgateError::Replayed.payment_retriable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(TollgateError::InsufficientFunds.http_status(), 402);
        assert_eq!(TollgateError::CapacityExceeded.http_status(), 409);
        assert_eq!(TollgateError::Timeout.http_status(), 504);
        assert_eq!(TollgateError::NotFound("x".into()).http_status(), 404);
    }
}
