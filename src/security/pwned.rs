// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Advisory breached-password lookup (Have I Been Pwned range API).
//!
//! Uses the k-anonymity model: only the first five hex characters of the
//! password's SHA-1 digest leave the machine. The service answers with every
//! known suffix under that prefix and the match happens locally.
//!
//! The check is advisory. Any failure (network, HTTP status, body) is
//! reported as "not compromised" and never blocks the member.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::time::Duration;

/// Public range API endpoint.
pub const DEFAULT_PWNED_API_URL: &str = "https://api.pwnedpasswords.com";

/// Default timeout for the range request (in seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Number of hex characters sent to the service.
const PREFIX_LEN: usize = 5;

/// Outcome of a breach lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BreachCheck {
    pub compromised: bool,

    /// How many times the password appears in known breaches.
    pub count: Option<u64>,
}

impl BreachCheck {
    fn clean() -> Self {
        Self::default()
    }
}

/// Settings for the lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwnedConfig {
    /// Run the check during sign-up.
    pub enabled: bool,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for PwnedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: DEFAULT_PWNED_API_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Client for the range API.
#[derive(Debug, Clone)]
pub struct PwnedPasswordClient {
    client: reqwest::Client,
    api_url: String,
}

impl Default for PwnedPasswordClient {
    fn default() -> Self {
        Self::new(&PwnedConfig::default())
    }
}

impl PwnedPasswordClient {
    pub fn new(config: &PwnedConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("PWNED_CHECK | client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });

        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Look `password` up. Never fails; see the module docs.
    pub async fn check(&self, password: &str) -> BreachCheck {
        if password.is_empty() {
            return BreachCheck::clean();
        }

        let (prefix, suffix) = split_hash(password);
        let url = format!("{}/range/{}", self.api_url, prefix);

        let response = match self
            .client
            .get(&url)
            .header("Add-Padding", "true")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("PWNED_CHECK | request failed: {}", e);
                return BreachCheck::clean();
            }
        };

        if !response.status().is_success() {
            tracing::warn!("PWNED_CHECK | API returned {}", response.status());
            return BreachCheck::clean();
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("PWNED_CHECK | unreadable response body: {}", e);
                return BreachCheck::clean();
            }
        };

        match find_suffix(&body, &suffix) {
            Some(count) => {
                tracing::info!("PWNED_CHECK | password found in {} breach record(s)", count);
                BreachCheck {
                    compromised: true,
                    count: Some(count),
                }
            }
            None => BreachCheck::clean(),
        }
    }
}

/// Uppercase SHA-1 hex of `password`, split into (prefix, suffix).
pub fn split_hash(password: &str) -> (String, String) {
    let digest = hex::encode_upper(Sha1::digest(password.as_bytes()));
    let (prefix, suffix) = digest.split_at(PREFIX_LEN);
    (prefix.to_string(), suffix.to_string())
}

/// Find `suffix` in a range response of `SUFFIX:COUNT` lines.
///
/// Padding rows (count 0) never count as a match.
pub fn find_suffix(body: &str, suffix: &str) -> Option<u64> {
    body.lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(candidate, _)| candidate.trim().eq_ignore_ascii_case(suffix))
        .filter_map(|(_, count)| count.trim().parse::<u64>().ok())
        .find(|count| *count > 0)
}
