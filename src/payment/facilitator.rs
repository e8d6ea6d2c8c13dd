//! Settlement facilitator clients
//!
//! The facilitator is the external system that checks a payment
//! authorization's signature and nonce and executes the transfer. This
//! service treats it as a black box behind the `SettlementFacilitator`
//! trait: one settlement attempt per call, success hands back a receipt,
//! every failure is categorized before it reaches the orchestrator.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

use super::{PaymentAuthorization, PaymentRequirement, SettlementReceipt};
use crate::types::{Result, TollgateError};

/// External settlement rail, consumed as a black box
#[async_trait]
pub trait SettlementFacilitator: Send + Sync {
    /// Attempt exactly one settlement of `authorization` against
    /// `requirement`. The caller is responsible for never invoking this twice
    /// for the same external request id.
    async fn settle(
        &self,
        requirement: &PaymentRequirement,
        authorization: &PaymentAuthorization,
    ) -> Result<SettlementReceipt>;
}

// ============================================================================
// HTTP facilitator
// ============================================================================

#[derive(Serialize)]
struct SettleRequest<'a> {
    payment_requirement: &'a PaymentRequirement,
    payment_authorization: &'a PaymentAuthorization,
}

#[derive(Deserialize)]
struct SettleResponse {
    success: bool,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// JSON-over-HTTP facilitator client
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFacilitator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TollgateError::Internal(format!("facilitator client build: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SettlementFacilitator for HttpFacilitator {
    async fn settle(
        &self,
        requirement: &PaymentRequirement,
        authorization: &PaymentAuthorization,
    ) -> Result<SettlementReceipt> {
        let url = format!("{}/settle", self.base_url);
        let body = SettleRequest {
            payment_requirement: requirement,
            payment_authorization: authorization,
        };

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(url = %url, "Settlement request timed out");
                return Err(TollgateError::Timeout);
            }
            Err(e) => {
                // transport detail stays in the log, never in the response
                warn!(url = %url, error = %e, "Settlement request failed");
                return Err(TollgateError::Facilitator("facilitator unreachable".into()));
            }
        };

        let status = response.status();
        let parsed: SettleResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(url = %url, status = %status, error = %e, "Unparseable facilitator response");
                return Err(TollgateError::Facilitator(
                    "facilitator returned an unparseable response".into(),
                ));
            }
        };

        if parsed.success {
            let reference = parsed.reference.ok_or_else(|| {
                TollgateError::Facilitator("facilitator success without reference".into())
            })?;
            debug!(reference = %reference, "Settlement captured");
            return Ok(SettlementReceipt {
                reference,
                captured_minor: authorization.amount_minor,
                settled_at: Utc::now(),
            });
        }

        Err(map_failure_reason(parsed.reason.as_deref()))
    }
}

/// Map the facilitator's machine reason string onto the error taxonomy
fn map_failure_reason(reason: Option<&str>) -> TollgateError {
    match reason {
        Some("insufficient_funds") => TollgateError::InsufficientFunds,
        Some("nonce_used") | Some("replayed") => TollgateError::Replayed,
        Some("authorization_expired") | Some("expired") => TollgateError::AuthorizationExpired,
        Some("invalid_signature") | Some("signature_mismatch") => TollgateError::InvalidSignature,
        Some(other) => TollgateError::Facilitator(format!("settlement rejected: {other}")),
        None => TollgateError::Facilitator("settlement rejected without reason".into()),
    }
}

// ============================================================================
// Dev facilitator
// ============================================================================

/// Local facilitator for development mode: approves any structurally valid
/// authorization and derives a stable reference from the nonce, so retries
/// during manual testing behave like a real rail.
pub struct DevFacilitator;

#[async_trait]
impl SettlementFacilitator for DevFacilitator {
    async fn settle(
        &self,
        _requirement: &PaymentRequirement,
        authorization: &PaymentAuthorization,
    ) -> Result<SettlementReceipt> {
        let mut hasher = Sha256::new();
        hasher.update(authorization.payer.as_bytes());
        hasher.update(authorization.nonce.as_bytes());
        let reference = format!("dev-{}", hex::encode(&hasher.finalize()[..12]));

        Ok(SettlementReceipt {
            reference,
            captured_minor: authorization.amount_minor,
            settled_at: Utc::now(),
        })
    }
}

// ============================================================================
// Test facilitator
// ============================================================================

/// Scripted facilitator for tests: pops outcomes from a queue and counts
/// settle calls, so idempotency tests can assert "settled exactly once".
#[cfg(test)]
pub struct MockFacilitator {
    calls: std::sync::atomic::AtomicUsize,
    script: tokio::sync::Mutex<std::collections::VecDeque<Result<SettlementReceipt>>>,
}

#[cfg(test)]
impl MockFacilitator {
    pub fn new() -> Self {
        Self {
            calls: std::sync::atomic::AtomicUsize::new(0),
            script: tokio::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub async fn push_success(&self, reference: &str) {
        self.script.lock().await.push_back(Ok(SettlementReceipt {
            reference: reference.to_string(),
            captured_minor: 0,
            settled_at: Utc::now(),
        }));
    }

    pub async fn push_failure(&self, err: TollgateError) {
        self.script.lock().await.push_back(Err(err));
    }

    pub fn settle_calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl SettlementFacilitator for MockFacilitator {
    async fn settle(
        &self,
        _requirement: &PaymentRequirement,
        authorization: &PaymentAuthorization,
    ) -> Result<SettlementReceipt> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.script.lock().await.pop_front() {
            Some(Ok(mut receipt)) => {
                receipt.captured_minor = authorization.amount_minor;
                Ok(receipt)
            }
            Some(Err(e)) => Err(e),
            // unscripted calls succeed with a nonce-derived reference
            None => Ok(SettlementReceipt {
                reference: format!("mock-{}", authorization.nonce),
                captured_minor: authorization.amount_minor,
                settled_at: Utc::now(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping() {
        assert!(matches!(
            map_failure_reason(Some("insufficient_funds")),
            TollgateError::InsufficientFunds
        ));
        assert!(matches!(
            map_failure_reason(Some("nonce_used")),
            TollgateError::Replayed
        ));
        assert!(matches!(
            map_failure_reason(Some("expired")),
            TollgateError::AuthorizationExpired
        ));
        assert!(matches!(
            map_failure_reason(Some("invalid_signature")),
            TollgateError::InvalidSignature
        ));
        assert!(matches!(
            map_failure_reason(Some("weird")),
            TollgateError::Facilitator(_)
        ));
        assert!(matches!(
            map_failure_reason(None),
            TollgateError::Facilitator(_)
        ));
    }

    #[tokio::test]
    async fn test_dev_facilitator_reference_is_stable() {
        use chrono::TimeZone;

        let auth = PaymentAuthorization {
            scheme: super::super::SCHEME_EXACT.into(),
            asset: "usdc".into(),
            network: "dev".into(),
            payer: "0xp".into(),
            pay_to: "0xg".into(),
            amount_minor: 100,
            valid_before: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            nonce: "n1".into(),
            signature: "sig".into(),
        };
        let requirement = PaymentRequirement {
            scheme: super::super::SCHEME_EXACT.into(),
            asset: "usdc".into(),
            network: "dev".into(),
            decimals: 6,
            amount_minor: 100,
            pay_to: "0xg".into(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        };

        let a = DevFacilitator.settle(&requirement, &auth).await.unwrap();
        let b = DevFacilitator.settle(&requirement, &auth).await.unwrap();
        assert_eq!(a.reference, b.reference);
        assert!(a.reference.starts_with("dev-"));
        assert_eq!(a.captured_minor, 100);
    }
}
