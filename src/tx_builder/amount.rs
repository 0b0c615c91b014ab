//! Decimal quantity parsing
//!
//! Quantities travel as decimal strings in whole units ("10", "0.25") and are
//! scaled to base units with the mint's declared decimals. Parsing is exact:
//! no floating point is involved, and every overflow is reported.

use crate::errors::CosignError;

/// Decimal scale of the native coin (lamports per SOL = 10^9)
pub const NATIVE_DECIMALS: u8 = 9;

/// Convert a whole-unit decimal string into base units
///
/// # Errors
///
/// `CosignError::InvalidAmount` when the input is empty, not a plain decimal
/// number, has more fractional digits than `decimals`, is zero, or does not fit
/// in a `u64` after scaling.
pub fn parse_ui_amount(input: &str, decimals: u8) -> Result<u64, CosignError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CosignError::invalid_amount("amount is empty"));
    }
    if trimmed.starts_with('-') {
        return Err(CosignError::invalid_amount(format!(
            "amount {} must be positive",
            trimmed
        )));
    }

    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(CosignError::invalid_amount(format!(
            "{} is not a decimal number",
            trimmed
        )));
    }
    if fraction.len() > decimals as usize {
        return Err(CosignError::invalid_amount(format!(
            "{} has more than {} fractional digits",
            trimmed, decimals
        )));
    }

    let overflow = || {
        CosignError::invalid_amount(format!(
            "{} overflows u64 at {} decimals",
            trimmed, decimals
        ))
    };

    // 10^decimals only has to fit in a u64 when there are whole units to scale
    let whole_units: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let scaled_whole = if whole_units == 0 {
        0
    } else {
        10u64
            .checked_pow(u32::from(decimals))
            .and_then(|scale| whole_units.checked_mul(scale))
            .ok_or_else(overflow)?
    };
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let significant = padded.trim_start_matches('0');
    let fraction_units: u64 = if significant.is_empty() {
        0
    } else {
        significant.parse().map_err(|_| overflow())?
    };

    let total = scaled_whole
        .checked_add(fraction_units)
        .ok_or_else(overflow)?;

    if total == 0 {
        return Err(CosignError::invalid_amount(format!(
            "amount {} must be positive",
            trimmed
        )));
    }
    Ok(total)
}

/// Render base units as a whole-unit decimal string without trailing zeros
pub fn format_ui_amount(amount: u64, decimals: u8) -> String {
    let decimals = decimals as usize;
    let digits = format!("{:0>width$}", amount, width = decimals + 1);
    let (whole, fraction) = digits.split_at(digits.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}
