// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Input sanitization and suspicious-pattern detection for form fields.
//!
//! These are coarse heuristics for flagging input, not a substitute for
//! escaping at the output boundary.

use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use std::sync::LazyLock;

/// JUSTIFICATION for .expect(): static patterns, validated by the tests below.
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

static SQL_INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|EXECUTE)\b")
            .expect("SQL keyword regex is valid"),
        Regex::new(r"(--|#|/\*|\*/)").expect("SQL comment regex is valid"),
        Regex::new(r"(?i)\bOR\b.*=.*").expect("SQL OR regex is valid"),
        Regex::new(r"(?i)\bAND\b.*=.*").expect("SQL AND regex is valid"),
        Regex::new(r"(?i)UNION.*SELECT").expect("SQL UNION regex is valid"),
    ]
});

static XSS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)<script[^>]*>.*</script>").expect("script tag regex is valid"),
        Regex::new(r"(?i)javascript:").expect("javascript URL regex is valid"),
        Regex::new(r"(?i)on\w+\s*=").expect("event handler regex is valid"),
        Regex::new(r"(?i)<iframe").expect("iframe regex is valid"),
        Regex::new(r"(?i)eval\(").expect("eval regex is valid"),
    ]
});

/// Escape HTML-significant characters and trim surrounding whitespace.
///
/// ```
/// use comet_guard::security::sanitize_input;
///
/// assert_eq!(sanitize_input("  <b>hi</b> "), "&lt;b&gt;hi&lt;&#x2F;b&gt;");
/// ```
pub fn sanitize_input(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '/' => escaped.push_str("&#x2F;"),
            other => escaped.push(other),
        }
    }
    escaped.trim().to_string()
}

/// Loose email shape check: something@something.something, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Flags input that looks like an SQL injection attempt.
pub fn detect_sql_injection(input: &str) -> bool {
    SQL_INJECTION_PATTERNS.iter().any(|pattern| pattern.is_match(input))
}

/// Flags input that looks like a script injection attempt.
pub fn detect_xss(input: &str) -> bool {
    XSS_PATTERNS.iter().any(|pattern| pattern.is_match(input))
}

/// 32 random bytes from the OS generator, hex encoded.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
