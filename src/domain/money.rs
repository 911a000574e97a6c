use thiserror::Error;

/// Money is represented as integer cents to avoid floating-point precision issues.
/// For EUR/USD, 1 unit = 100 cents, so €50.00 = 5000 cents.
pub type Cents = i64;

/// Format cents as a decimal string with exactly two fractional digits.
/// Example: 5000 -> "50.00", 1 -> "0.01"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.unsigned_abs();
    let units = abs_cents / 100;
    let remainder = abs_cents % 100;
    format!("{}{}.{:02}", sign, units, remainder)
}

/// Parse a boundary amount into cents.
///
/// Only the canonical shape `units.cc` is accepted: ASCII digits, no sign,
/// no leading zeros on the units part (other than a lone `0`) and exactly two
/// fractional digits. Every accepted string therefore formats back to itself.
/// Example: "50.00" -> 5000, "0.01" -> 1
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let invalid = || ParseCentsError::InvalidFormat(input.to_string());

    let (units, fraction) = input.split_once('.').ok_or_else(invalid)?;

    if units.is_empty() || !units.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if units.len() > 1 && units.starts_with('0') {
        return Err(invalid());
    }
    if fraction.len() != 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let units: i64 = units.parse().map_err(|_| invalid())?;
    let fraction: i64 = fraction.parse().map_err(|_| invalid())?;

    units
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(fraction))
        .ok_or_else(invalid)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCentsError {
    #[error("invalid money format '{0}', expected e.g. 100.00")]
    InvalidFormat(String),
}
