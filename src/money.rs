//! Minor-unit money handling
//!
//! All amounts in the pipeline are integer minor units of a single configured
//! settlement asset (e.g. one-millionth of a unit for a 6-decimal asset).
//! Caller-facing decimal strings are parsed on the way in and rendered on the
//! way out; nothing in between touches floating point.

use serde::{Deserialize, Serialize};

use crate::types::{Result, TollgateError};

/// Amounts are bounded so they round-trip through signed 64-bit storage
pub const MAX_MINOR: u64 = i64::MAX as u64;

/// Settlement asset the service prices and settles in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Asset identifier understood by the facilitator (e.g. "usdc")
    pub asset: String,
    /// Settlement network identifier (e.g. "base-sepolia")
    pub network: String,
    /// Decimal precision of the asset's minor unit
    pub decimals: u32,
    /// Address payments must be made out to
    pub pay_to: String,
}

/// Parse a decimal string like "0.80" into integer minor units.
///
/// Rejects negatives, malformed text, and fraction digits beyond the asset
/// precision - caller input is never silently rounded.
pub fn parse_decimal(text: &str, decimals: u32) -> Result<u64> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TollgateError::InvalidParameters("empty amount".into()));
    }
    if text.starts_with('-') {
        return Err(TollgateError::InvalidParameters(format!(
            "negative amount '{text}'"
        )));
    }
    if text.starts_with('+') {
        return Err(TollgateError::InvalidParameters(format!(
            "malformed amount '{text}'"
        )));
    }

    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(TollgateError::InvalidParameters(format!(
            "malformed amount '{text}'"
        )));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(TollgateError::InvalidParameters(format!(
            "malformed amount '{text}'"
        )));
    }
    if frac_part.len() > decimals as usize {
        return Err(TollgateError::InvalidParameters(format!(
            "amount '{text}' has more than {decimals} fraction digits"
        )));
    }

    let scale = 10u128.pow(decimals);
    let int_val: u128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| TollgateError::InvalidParameters(format!("amount '{text}' too large")))?
    };

    let mut frac_val: u128 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().map_err(|_| {
            TollgateError::InvalidParameters(format!("amount '{text}' too large"))
        })?
    };
    frac_val *= 10u128.pow(decimals - frac_part.len() as u32);

    let minor = int_val
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| TollgateError::InvalidParameters(format!("amount '{text}' too large")))?;

    if minor > MAX_MINOR as u128 {
        return Err(TollgateError::InvalidParameters(format!(
            "amount '{text}' too large"
        )));
    }
    Ok(minor as u64)
}

/// Render minor units as a canonical decimal string ("4545000" at 6 decimals
/// becomes "4.545000")
pub fn format_minor(minor: u64, decimals: u32) -> String {
    let scale = 10u64.pow(decimals);
    if decimals == 0 {
        return minor.to_string();
    }
    format!(
        "{}.{:0width$}",
        minor / scale,
        minor % scale,
        width = decimals as usize
    )
}

/// Serde helper: minor-unit amounts travel as strings on the wire so large
/// values survive JSON number handling in non-Rust callers
pub mod minor_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
        let s = String::deserialize(de)?;
        s.parse::<u64>()
            .map_err(|_| de::Error::custom(format!("invalid minor-unit amount '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(parse_decimal("0.80", 6).unwrap(), 800_000);
        assert_eq!(parse_decimal("0.10", 6).unwrap(), 100_000);
        assert_eq!(parse_decimal("4.545", 6).unwrap(), 4_545_000);
        assert_eq!(parse_decimal("12", 6).unwrap(), 12_000_000);
        assert_eq!(parse_decimal(".5", 6).unwrap(), 500_000);
        assert_eq!(parse_decimal("3.", 6).unwrap(), 3_000_000);
        assert_eq!(parse_decimal("0", 6).unwrap(), 0);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_decimal("", 6).is_err());
        assert!(parse_decimal("-1", 6).is_err());
        assert!(parse_decimal("+1", 6).is_err());
        assert!(parse_decimal("1.2.3", 6).is_err());
        assert!(parse_decimal("abc", 6).is_err());
        assert!(parse_decimal(".", 6).is_err());
        // more fraction digits than the asset supports
        assert!(parse_decimal("0.1234567", 6).is_err());
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(parse_decimal("99999999999999999999", 6).is_err());
    }

    #[test]
    fn test_format_round_trip() {
        assert_eq!(format_minor(4_545_000, 6), "4.545000");
        assert_eq!(format_minor(580_000, 6), "0.580000");
        assert_eq!(format_minor(0, 6), "0.000000");
        assert_eq!(format_minor(7, 0), "7");
        let minor = parse_decimal("123.456789", 6).unwrap();
        assert_eq!(format_minor(minor, 6), "123.456789");
    }
}
