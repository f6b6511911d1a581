//! Secret redaction for error strings
//!
//! Probe failures and HTTP client errors can echo request fragments that
//! carry credentials. Everything that ends up in a check result, status
//! record, log line, or metric label passes through [`sanitize`] first.

use once_cell::sync::Lazy;
use regex::Regex;

const MASK: &str = "[REDACTED]";

static HEADER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // header-style credentials: keep the header name, mask the whole tail
        Regex::new(r"(?i)(authorization:\s*)[^\r\n]+").expect("authorization pattern"),
        Regex::new(r"(?i)(x-api-key:\s*)[^\r\n]+").expect("x-api-key pattern"),
        // bare bearer tokens outside a header context
        Regex::new(r"(?i)(bearer\s+)[a-z0-9._~+/=-]+").expect("bearer pattern"),
    ]
});

static QUERY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)([?&]token=)[^&\s]*").expect("token pattern"),
        Regex::new(r"(?i)([?&]api_key=)[^&\s]*").expect("api_key pattern"),
    ]
});

/// Mask credential material in an arbitrary error string.
pub fn sanitize(message: &str) -> String {
    let mut out = message.to_string();
    for pattern in HEADER_PATTERNS.iter() {
        out = pattern.replace_all(&out, format!("${{1}}{MASK}")).into_owned();
    }
    for pattern in QUERY_PATTERNS.iter() {
        out = pattern.replace_all(&out, format!("${{1}}{MASK}")).into_owned();
    }
    out
}

/// Sanitize an optional message in place, preserving `None`.
pub fn sanitize_opt(message: Option<String>) -> Option<String> {
    message.map(|m| sanitize(&m))
}
