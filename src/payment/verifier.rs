//! Payment verification
//!
//! Structural checks happen here, before any network call: the authorization
//! must name the required asset, network, payee, and the exact amount.
//! Overpayment is rejected the same as underpayment - accepting it would
//! leave an unanswerable refund question. Cryptographic and nonce
//! verification is delegated to the facilitator.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::{PaymentAuthorization, PaymentRequirement, SettlementFacilitator, SettlementReceipt};
use crate::types::{Result, TollgateError};

pub struct PaymentVerifier {
    facilitator: Arc<dyn SettlementFacilitator>,
}

impl PaymentVerifier {
    pub fn new(facilitator: Arc<dyn SettlementFacilitator>) -> Self {
        Self { facilitator }
    }

    /// Verify the authorization against the requirement and attempt exactly
    /// one settlement. All failures come back categorized; a replayed nonce
    /// surfaces as `Replayed` from the facilitator.
    pub async fn verify_and_settle(
        &self,
        requirement: &PaymentRequirement,
        authorization: &PaymentAuthorization,
    ) -> Result<SettlementReceipt> {
        check_structure(requirement, authorization, Utc::now())?;

        debug!(
            payer = %authorization.payer,
            amount_minor = authorization.amount_minor,
            "Authorization structurally valid, requesting settlement"
        );

        let receipt = self
            .facilitator
            .settle(requirement, authorization)
            .await?;

        info!(
            reference = %receipt.reference,
            captured_minor = receipt.captured_minor,
            payer = %authorization.payer,
            "Settlement captured"
        );
        Ok(receipt)
    }
}

/// Strict structural match between authorization and requirement
fn check_structure(
    requirement: &PaymentRequirement,
    authorization: &PaymentAuthorization,
    now: DateTime<Utc>,
) -> Result<()> {
    if authorization.scheme != requirement.scheme {
        return Err(TollgateError::PaymentMismatch(format!(
            "scheme '{}' != required '{}'",
            authorization.scheme, requirement.scheme
        )));
    }
    if authorization.asset != requirement.asset {
        return Err(TollgateError::PaymentMismatch(format!(
            "asset '{}' != required '{}'",
            authorization.asset, requirement.asset
        )));
    }
    if authorization.network != requirement.network {
        return Err(TollgateError::PaymentMismatch(format!(
            "network '{}' != required '{}'",
            authorization.network, requirement.network
        )));
    }
    if authorization.pay_to != requirement.pay_to {
        return Err(TollgateError::PaymentMismatch(format!(
            "payee '{}' != required '{}'",
            authorization.pay_to, requirement.pay_to
        )));
    }
    // exact match: no partial payments, no silently accepted overpayment
    if authorization.amount_minor != requirement.amount_minor {
        return Err(TollgateError::PaymentMismatch(format!(
            "amount {} != required {}",
            authorization.amount_minor, requirement.amount_minor
        )));
    }
    if authorization.valid_before <= now {
        return Err(TollgateError::AuthorizationExpired);
    }
    if authorization.signature.is_empty() || authorization.nonce.is_empty() {
        return Err(TollgateError::PaymentMismatch(
            "authorization missing signature or nonce".into(),
        ));
    }
    Ok(())
}
