//! Integer representation of loyalty-point amounts.
//!
//! All stored and computed amounts are `i64` **centipoints** (1 point =
//! 100 centipoints). The accrual authority publishes point amounts with at
//! most two fractional digits, so centipoints are lossless; arithmetic never
//! touches floating point. The only float in sight is the authority's JSON
//! number, converted once at the wire boundary by [`centi_from_wire`].

use std::fmt;

pub const CENTI_PER_POINT: i64 = 100;

/// Largest wire amount accepted, in points. Far above any realistic accrual
/// and small enough that `value * 100` stays exact in an f64.
const MAX_WIRE_POINTS: f64 = 10_000_000_000_000.0;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced converting external amounts into centipoints.
#[derive(Debug, PartialEq, Eq)]
pub enum PointsError {
    /// The amount string was empty.
    Empty,
    /// The amount could not be read as a decimal number.
    Invalid { raw: String },
    /// More than 2 decimal places (would require rounding a text amount).
    TooManyDecimalPlaces { raw: String },
    /// Point amounts are magnitudes; negative input is never meaningful.
    Negative { raw: String },
    /// The amount does not fit the accepted range.
    OutOfRange { raw: String },
}

impl fmt::Display for PointsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointsError::Empty => write!(f, "point amount is empty"),
            PointsError::Invalid { raw } => {
                write!(f, "point amount could not be parsed: '{raw}'")
            }
            PointsError::TooManyDecimalPlaces { raw } => {
                write!(f, "point amount has more than 2 decimal places: '{raw}'")
            }
            PointsError::Negative { raw } => {
                write!(f, "point amount must not be negative: '{raw}'")
            }
            PointsError::OutOfRange { raw } => {
                write!(f, "point amount out of range: '{raw}'")
            }
        }
    }
}

impl std::error::Error for PointsError {}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Convert a decimal amount string to centipoints deterministically.
///
/// Rules:
/// - Accepts an optional fractional part separated by `.`.
/// - Rejects more than 2 decimal places (no silent rounding of text input).
/// - Rejects empty strings, signs, non-digit characters, multiple `.`.
/// - No floating point at any stage.
pub fn centi_from_str(s: &str) -> Result<i64, PointsError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(PointsError::Empty);
    }
    if s.starts_with('-') {
        return Err(PointsError::Negative { raw: s.to_string() });
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };

    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(PointsError::Invalid { raw: s.to_string() });
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(PointsError::Invalid { raw: s.to_string() });
    }
    if frac_part.len() > 2 {
        return Err(PointsError::TooManyDecimalPlaces { raw: s.to_string() });
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse::<i64>()
            .map_err(|_| PointsError::OutOfRange { raw: s.to_string() })?
    };

    let mut frac_padded = frac_part.to_string();
    while frac_padded.len() < 2 {
        frac_padded.push('0');
    }
    // Two digits always parse.
    let frac_val: i64 = frac_padded
        .parse::<i64>()
        .map_err(|_| PointsError::Invalid { raw: s.to_string() })?;

    int_val
        .checked_mul(CENTI_PER_POINT)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| PointsError::OutOfRange { raw: s.to_string() })
}

/// Convert the authority's JSON number to centipoints.
///
/// The wire contract says at most two decimal places, but the value arrives
/// as a binary float, so the conversion rounds to the nearest centipoint
/// rather than demanding bit-exactness. NaN, infinities, negatives and
/// absurd magnitudes are rejected.
pub fn centi_from_wire(value: f64) -> Result<i64, PointsError> {
    if !value.is_finite() {
        return Err(PointsError::Invalid {
            raw: value.to_string(),
        });
    }
    if value < 0.0 {
        return Err(PointsError::Negative {
            raw: value.to_string(),
        });
    }
    if value > MAX_WIRE_POINTS {
        return Err(PointsError::OutOfRange {
            raw: value.to_string(),
        });
    }
    Ok((value * CENTI_PER_POINT as f64).round() as i64)
}

/// Render centipoints as a decimal string: whole points without a fraction
/// (`"500"`), otherwise two places (`"729.98"`). Used for logs and wire-facing
/// display; never parsed back into arithmetic.
pub fn format_centi(centi: i64) -> String {
    let sign = if centi < 0 { "-" } else { "" };
    let magnitude = centi.unsigned_abs();
    let points = magnitude / 100;
    let frac = magnitude % 100;
    if frac == 0 {
        format!("{sign}{points}")
    } else {
        format!("{sign}{points}.{frac:02}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
