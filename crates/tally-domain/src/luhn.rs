//! Luhn (mod-10) checksum for order numbers.
//!
//! Order numbers are sanity-checked before any storage round trip: every
//! second digit from the right is doubled (subtracting 9 when the double
//! exceeds 9) and the total must be divisible by 10.

/// Returns `true` when `number` is a non-empty all-digit string passing the
/// Luhn checksum. Any non-digit character fails the check, as does the empty
/// string.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }
    let mut sum: u32 = 0;
    let mut double = false;
    for ch in number.chars().rev() {
        let Some(mut digit) = ch.to_digit(10) else {
            return false;
        };
        if double {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
        double = !double;
    }
    sum % 10 == 0
}
