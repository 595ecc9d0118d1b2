// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retrying HTTP forwarder for the patch-execution runner.
//!
//! POSTs persisted patch bytes to a configured downstream URL with a
//! 5-second per-attempt timeout, retrying on transport error or a
//! non-2xx response up to a fixed retry count with a flat 1-second
//! backoff. Forward failure is never fatal to the originating request —
//! callers report it via [`ForwardOutcome::forwarded`], not by
//! propagating an error.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use reqwest::Client;
use std::time::Duration;

const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF: Duration = Duration::from_secs(1);

/// Outcome of attempting to forward a patch payload downstream.
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    /// `true` iff some attempt received a 2xx response.
    pub forwarded: bool,
    /// Number of attempts made (1 + retries actually used).
    pub attempts: u32,
    /// The most recent failure reason, if `forwarded` is `false`.
    pub last_error: Option<String>,
}

/// Posts `body` to `url` with retry.
pub struct Forwarder {
    client: Client,
    url: String,
    retry_count: u32,
}

impl Forwarder {
    /// Build a forwarder targeting `url`, retrying up to `retry_count`
    /// additional times beyond the initial attempt.
    #[must_use]
    pub fn new(url: impl Into<String>, retry_count: u32) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            retry_count,
        }
    }

    /// Forward `body` (already-serialized JSON bytes) downstream.
    ///
    /// This never returns `Err`: every failure mode is represented in the
    /// returned [`ForwardOutcome`], matching the ingest pipeline's
    /// contract that forward failure must not fail the request.
    pub async fn forward(&self, body: Vec<u8>) -> ForwardOutcome {
        let max_attempts = self.retry_count + 1;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let result = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .timeout(PER_ATTEMPT_TIMEOUT)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return ForwardOutcome {
                        forwarded: true,
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Ok(response) => {
                    last_error = Some(format!("downstream responded {}", response.status()));
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                }
            }

            if attempt < max_attempts {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = ?last_error,
                    "forward attempt failed, retrying"
                );
                tokio::time::sleep(BACKOFF).await;
            }
        }

        tracing::error!(url = %self.url, error = ?last_error, "forward exhausted all retries");
        ForwardOutcome {
            forwarded: false,
            attempts: max_attempts,
            last_error,
        }
    }
}
