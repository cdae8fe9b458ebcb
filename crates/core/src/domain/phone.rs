use std::sync::OnceLock;

use regex::Regex;

use crate::error::{CoreError, Result};

static E164: OnceLock<Option<Regex>> = OnceLock::new();

fn e164() -> Option<&'static Regex> {
    E164.get_or_init(|| Regex::new(r"^\+[1-9][0-9]{1,14}$").ok())
        .as_ref()
}

/// Normalize a dialable number into E.164 form.
///
/// Common visual separators (spaces, dashes, dots, parentheses) are stripped
/// before validation; anything else that is not a digit is rejected.
pub fn normalize_e164(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidPhoneNumber {
            number: raw.to_string(),
            reason: "number is empty".to_string(),
        });
    }

    let compact: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if !compact.starts_with('+') {
        return Err(CoreError::InvalidPhoneNumber {
            number: raw.to_string(),
            reason: "missing leading '+' country code".to_string(),
        });
    }

    let valid = e164().map(|re| re.is_match(&compact)).unwrap_or(false);
    if !valid {
        return Err(CoreError::InvalidPhoneNumber {
            number: raw.to_string(),
            reason: "expected '+' followed by 2 to 15 digits".to_string(),
        });
    }

    Ok(compact)
}
