//! Log sanitization.
//!
//! Anything that may carry user input or credential material passes through
//! here before it reaches a `tracing` event: control characters are replaced
//! so a value cannot forge extra log lines, and `key=value` pairs whose key
//! names a secret are masked.

/// Replacement for masked values.
pub const MASK: &str = "****";

/// Key fragments that mark a value as sensitive (matched case-insensitively).
const SENSITIVE_TERMS: [&str; 7] = [
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "apikey",
    "authorization",
];

/// Returns `true` when `key` names a credential-bearing field.
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase().replace(['_', '-'], "");
    SENSITIVE_TERMS.iter().any(|term| lowered.contains(term))
}

/// Replaces control characters with `_`.
pub fn sanitize_message(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect()
}

/// Sanitizes a free-text value: strips control characters and masks every
/// `sensitive_key=value` pair. Values end at whitespace or a comma.
pub fn sanitize_value(value: &str) -> String {
    let cleaned = sanitize_message(value);
    let mut out = String::with_capacity(cleaned.len());
    let mut token = String::new();

    for c in cleaned.chars() {
        if c.is_whitespace() || c == ',' {
            out.push_str(&mask_pair(&token));
            token.clear();
            out.push(c);
        } else {
            token.push(c);
        }
    }
    out.push_str(&mask_pair(&token));
    out
}

fn mask_pair(token: &str) -> String {
    match token.split_once('=') {
        Some((key, value)) if !value.is_empty() && is_sensitive_key(key) => {
            format!("{}={}", key, MASK)
        }
        _ => token.to_string(),
    }
}

/// Renders an error for logging with [`sanitize_value`] applied.
pub fn sanitize_error(err: &dyn std::fmt::Display) -> String {
    sanitize_value(&err.to_string())
}
