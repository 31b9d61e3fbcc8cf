//! Numeric identifier normalisation.

use crate::error::ServiceError;

/// Allowed canonical length, in digits.
pub const MIN_ID_DIGITS: usize = 9;
pub const MAX_ID_DIGITS: usize = 12;

/// A numeric ID in canonical (digits only) and display (grouped) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedId {
    pub canonical: String,
    pub display: String,
}

/// Strip every non-digit character and validate the length.
///
/// Formatting differences (`806-716-144`, ` 806 716 144 `) normalise to the
/// same canonical form.
pub fn normalize(raw: &str) -> Result<NormalizedId, ServiceError> {
    let canonical: String = raw.chars().filter(char::is_ascii_digit).collect();

    if !(MIN_ID_DIGITS..=MAX_ID_DIGITS).contains(&canonical.len()) {
        return Err(ServiceError::Validation(format!(
            "ID must contain {MIN_ID_DIGITS} to {MAX_ID_DIGITS} digits"
        )));
    }

    let display = format_display(&canonical);
    Ok(NormalizedId { canonical, display })
}

/// Group digits in threes from the least-significant end, separated by a
/// space (`1234567890` -> `1 234 567 890`).
pub fn format_display(canonical: &str) -> String {
    let len = canonical.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in canonical.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}
