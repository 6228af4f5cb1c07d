// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for comet-guard.

/// Mask an identifier (usually an email) for logging.
///
/// Keeps the first `visible_prefix` characters of the local part and the
/// domain, so lockouts stay traceable without writing full addresses to logs.
///
/// # Examples
///
/// ```
/// use comet_guard::utils::mask_identifier;
///
/// assert_eq!(mask_identifier("jordan@comet.fit", 2), "jo...@comet.fit");
/// assert_eq!(mask_identifier("no-at-sign", 3), "no-...");
/// ```
pub fn mask_identifier(input: &str, visible_prefix: usize) -> String {
    let (local, domain) = match input.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (input, None),
    };

    let prefix: String = local.chars().take(visible_prefix).collect();
    match domain {
        Some(domain) => format!("{}...@{}", prefix, domain),
        None => format!("{}...", prefix),
    }
}

/// Format a second count as `M:SS` with zero-padded seconds.
///
/// ```
/// use comet_guard::utils::format_remaining;
///
/// assert_eq!(format_remaining(300), "5:00");
/// assert_eq!(format_remaining(65), "1:05");
/// ```
pub fn format_remaining(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_identifier() {
        assert_eq!(mask_identifier("athlete@example.com", 3), "ath...@example.com");
        assert_eq!(mask_identifier("a@b.co", 3), "a...@b.co");
        assert_eq!(mask_identifier("", 3), "...");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(0), "0:00");
        assert_eq!(format_remaining(9), "0:09");
        assert_eq!(format_remaining(1800), "30:00");
        assert_eq!(format_remaining(299), "4:59");
    }
}
