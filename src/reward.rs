//! Reward engine
//!
//! Pure computation of a participant's payout from the task's economics and
//! the quality score assigned during rating. The bonus scales linearly with
//! the score and floors to the asset's minor unit, so the payout is bounded
//! by `base + max_bonus` and monotone in the score.

use crate::types::{Result, TollgateError};

/// Quality scores are integers in [1,10]
pub const SCORE_MIN: u8 = 1;
pub const SCORE_MAX: u8 = 10;

/// Compute the final payout in minor units.
///
/// `bonus = max_bonus x score / 10` with floor division. A missing score must
/// never reach this function - the rating flow gates on score presence first.
pub fn compute_reward(base_minor: u64, max_bonus_minor: u64, quality_score: u8) -> Result<u64> {
    if !(SCORE_MIN..=SCORE_MAX).contains(&quality_score) {
        return Err(TollgateError::InvalidScore(quality_score as i64));
    }

    let bonus = (max_bonus_minor as u128 * quality_score as u128 / SCORE_MAX as u128) as u64;
    base_minor
        .checked_add(bonus)
        .ok_or_else(|| TollgateError::Internal("reward overflows".into()))
}
