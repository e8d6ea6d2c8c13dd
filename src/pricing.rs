//! Pricing engine
//!
//! Pure function from task economics to a payment requirement. Determinism
//! matters here: a retry recomputes the price and re-verifies the caller's
//! authorization against it, so identical inputs must always produce an
//! identical requirement.

use chrono::{DateTime, Duration, Utc};

use crate::money::{self, AssetConfig, MAX_MINOR};
use crate::payment::{PaymentRequirement, SCHEME_EXACT};
use crate::types::{Result, TollgateError};

/// Static pricing inputs fixed at startup
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub asset: AssetConfig,
    /// Platform fee in basis points (100 = 1%)
    pub fee_bps: u32,
    /// How long a computed requirement is honored
    pub requirement_ttl_secs: i64,
}

/// Compute the payment required to fund a task.
///
/// `total = participants x (per-participant reward + per-participant bonus
/// pool)`, plus the platform fee, floored to the asset's minor unit. A
/// non-zero minimum of one minor unit is enforced so rounding can never
/// produce a free task. Pure in all arguments, `issued_at` included.
pub fn compute_price(
    config: &PricingConfig,
    participants: u32,
    per_participant_reward: &str,
    bonus_pool: &str,
    issued_at: DateTime<Utc>,
) -> Result<PaymentRequirement> {
    if participants == 0 {
        return Err(TollgateError::InvalidParameters(
            "participants must be positive".into(),
        ));
    }

    let reward_minor = money::parse_decimal(per_participant_reward, config.asset.decimals)?;
    let bonus_minor = money::parse_decimal(bonus_pool, config.asset.decimals)?;

    let per_head = reward_minor as u128 + bonus_minor as u128;
    let subtotal = per_head * participants as u128;
    // fee floors toward the payer; the subtotal itself is already integral
    let fee = subtotal * config.fee_bps as u128 / 10_000;
    let total = subtotal
        .checked_add(fee)
        .filter(|t| *t <= MAX_MINOR as u128)
        .ok_or_else(|| TollgateError::InvalidParameters("total amount overflows".into()))?;

    let amount_minor = (total as u64).max(1);

    Ok(PaymentRequirement {
        scheme: SCHEME_EXACT.into(),
        asset: config.asset.asset.clone(),
        network: config.asset.network.clone(),
        decimals: config.asset.decimals,
        amount_minor,
        pay_to: config.asset.pay_to.clone(),
        expires_at: issued_at + Duration::seconds(config.requirement_ttl_secs),
    })
}
