//! Minor currency unit helpers
//!
//! Amounts travel as integer minor units everywhere; the only place they are
//! divided by 100 is when a human-readable decimal string is stored on a
//! transaction record.

/// Format an amount in minor units as a decimal string with two places
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
