//! Payment types for the 402 challenge/response flow
//!
//! A `PaymentRequirement` is the challenge: what the caller must pay, to
//! whom, in which asset, by when. A `PaymentAuthorization` is the caller's
//! signed answer; it is only ever verified or rejected, never mutated. A
//! `SettlementReceipt` is what the facilitator hands back when value actually
//! moved.

pub mod facilitator;
pub mod verifier;

pub use facilitator::{DevFacilitator, HttpFacilitator, SettlementFacilitator};
pub use verifier::PaymentVerifier;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Result, TollgateError};

/// Payment scheme this service speaks: exact-amount, single-use authorizations
pub const SCHEME_EXACT: &str = "exact";

/// The price challenge computed for a task request.
///
/// Deterministic for a given set of inputs - recomputing on a retry must
/// produce the same asset, payee, and amount so re-verification is safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaymentRequirement {
    pub scheme: String,
    /// Asset identifier (e.g. "usdc")
    pub asset: String,
    /// Settlement network identifier
    pub network: String,
    /// Decimal precision of the asset
    pub decimals: u32,
    /// Required amount in integer minor units
    #[serde(with = "crate::money::minor_string")]
    pub amount_minor: u64,
    /// Address the payment must be made out to
    pub pay_to: String,
    /// When this requirement stops being honored
    pub expires_at: DateTime<Utc>,
}

/// Caller-supplied signed payment authorization.
///
/// Opaque to this service beyond the declared fields: signature and nonce
/// validity are the facilitator's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub scheme: String,
    pub asset: String,
    pub network: String,
    /// Paying address
    pub payer: String,
    /// Receiving address the payer signed over
    pub pay_to: String,
    /// Authorized amount in integer minor units
    #[serde(with = "crate::money::minor_string")]
    pub amount_minor: u64,
    /// Authorization is invalid at or after this instant
    pub valid_before: DateTime<Utc>,
    /// Single-use nonce consumed by settlement
    pub nonce: String,
    /// Payer signature over the authorization fields (hex)
    pub signature: String,
}

impl PaymentAuthorization {
    /// Decode an authorization from the `X-Payment` header value:
    /// base64 (standard or URL-safe, padded or not) wrapping JSON.
    pub fn from_header(header: &str) -> Result<Self> {
        let raw = decode_base64(header.trim())?;
        serde_json::from_slice(&raw).map_err(|e| {
            TollgateError::InvalidParameters(format!("malformed payment authorization: {e}"))
        })
    }

    /// Encode for the `X-Payment` header (used by tests and client tooling)
    pub fn to_header(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| TollgateError::Internal(format!("authorization encode: {e}")))?;
        Ok(general_purpose::STANDARD.encode(json))
    }
}

fn decode_base64(input: &str) -> Result<Vec<u8>> {
    for engine in [
        &general_purpose::STANDARD,
        &general_purpose::URL_SAFE,
        &general_purpose::STANDARD_NO_PAD,
        &general_purpose::URL_SAFE_NO_PAD,
    ] {
        if let Ok(data) = engine.decode(input) {
            return Ok(data);
        }
    }
    Err(TollgateError::InvalidParameters(
        "payment header is not valid base64".into(),
    ))
}

/// Proof from the facilitator that value moved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// External transaction identifier assigned by the facilitator
    pub reference: String,
    /// Amount actually captured, in minor units
    #[serde(with = "crate::money::minor_string")]
    pub captured_minor: u64,
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_authorization() -> PaymentAuthorization {
        PaymentAuthorization {
            scheme: SCHEME_EXACT.into(),
            asset: "usdc".into(),
            network: "base-sepolia".into(),
            payer: "0xpayer".into(),
            pay_to: "0xgate".into(),
            amount_minor: 4_545_000,
            valid_before: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            nonce: "a1b2c3".into(),
            signature: "deadbeef".into(),
        }
    }

    #[test]
    fn test_header_round_trip() {
        let auth = sample_authorization();
        let header = auth.to_header().unwrap();
        let decoded = PaymentAuthorization::from_header(&header).unwrap();
        assert_eq!(decoded.amount_minor, 4_545_000);
        assert_eq!(decoded.nonce, "a1b2c3");
        assert_eq!(decoded.pay_to, "0xgate");
    }

    #[test]
    fn test_header_url_safe_accepted() {
        let auth = sample_authorization();
        let json = serde_json::to_vec(&auth).unwrap();
        let header = general_purpose::URL_SAFE_NO_PAD.encode(json);
        assert!(PaymentAuthorization::from_header(&header).is_ok());
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(PaymentAuthorization::from_header("!!not-base64!!").is_err());
        let not_json = general_purpose::STANDARD.encode(b"plain text");
        assert!(PaymentAuthorization::from_header(&not_json).is_err());
    }

    #[test]
    fn test_amount_travels_as_string() {
        let auth = sample_authorization();
        let value = serde_json::to_value(&auth).unwrap();
        assert_eq!(value["amount_minor"], "4545000");
    }
}
