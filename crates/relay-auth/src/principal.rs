//! Phone number principals.

use crate::error::AuthError;

/// Normalize a phone number to E.164 (`+` followed by 7 to 15 digits).
///
/// Spaces, dashes, dots and parentheses are ignored. A number written
/// without a leading `+` must carry at least 10 digits so that it plausibly
/// includes a country code.
pub fn normalize_phone_number(number: &str) -> Result<String, AuthError> {
    let number = number.trim();
    let (has_plus, rest) = match number.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, number),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(invalid(number, "unexpected character")),
        }
    }

    match digits.len() {
        0 => Err(invalid(number, "no digits")),
        1..=6 => Err(invalid(number, "too short")),
        16.. => Err(invalid(number, "too long")),
        n if !has_plus && n < 10 => Err(invalid(number, "missing country code")),
        _ => Ok(format!("+{}", digits)),
    }
}

fn invalid(number: &str, reason: &str) -> AuthError {
    AuthError::InvalidPrincipal(format!("{:?}: {}", number, reason))
}
