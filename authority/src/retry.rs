//! HTTP retry policy with exponential backoff.
//!
//! Issuance calls are retried on transient failures only: connection and
//! timeout errors, plus HTTP 408, 429, and 5xx. Delays grow exponentially
//! from `initial_delay` up to `max_delay`, down-jittered by up to
//! `jitter_factor`, and a `Retry-After` header from the authority overrides
//! the computed delay when present and sane.
//!
//! Every attempt of one logical call carries the same `Idempotency-Key`
//! header, so the authority can collapse a retried request that actually
//! landed the first time.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use uuid::Uuid;

/// Retry configuration for authority calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the initial request).
    pub max_retries: u32,
    /// Backoff delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff delay ceiling.
    pub max_delay: Duration,
    /// Down-jitter factor (0.25 = delay reduced by up to 25%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Total attempts including the initial request.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Parse a `Retry-After` header (integer seconds form).
///
/// Returns `Some(duration)` only for values in `(0s, 60s)`; anything else
/// falls back to computed backoff.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?;
    let secs = value.parse::<u64>().ok()?;
    let duration = Duration::from_secs(secs);
    if duration > Duration::ZERO && duration < Duration::from_secs(60) {
        Some(duration)
    } else {
        None
    }
}

/// Whether a response status warrants a retry.
#[must_use]
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500..=599)
}

/// Backoff delay before retry number `backoff_step + 1`.
///
/// A valid `Retry-After` header takes precedence over the computed delay.
#[must_use]
pub fn retry_delay(
    backoff_step: u32,
    config: &RetryConfig,
    headers: Option<&HeaderMap>,
) -> Duration {
    if let Some(delay) = headers.and_then(parse_retry_after) {
        return delay;
    }

    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(backoff_step as i32);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = 1.0 - rand::random::<f64>() * config.jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}

#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("learnova-issue-{}", Uuid::new_v4())
}

/// Outcome of a retried request.
///
/// Success and failure are structurally distinct so callers cannot treat an
/// error response as success by accident.
#[derive(Debug)]
pub enum RetryOutcome {
    /// 2xx response.
    Success(Response),
    /// Non-2xx response: either non-retryable, or retries are exhausted.
    /// The response is kept for error body inspection.
    HttpError { attempts: u32, response: Response },
    /// Transport failure (connect, timeout) after exhausting retries.
    Transport {
        attempts: u32,
        source: reqwest::Error,
    },
}

/// Send a request with automatic retries.
///
/// `build_request` is called once per attempt; every attempt carries the
/// same `Idempotency-Key`.
pub async fn send_with_retry<F>(build_request: F, config: &RetryConfig) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let idempotency_key = generate_idempotency_key();
    let mut attempt = 0u32;

    loop {
        let request = build_request().header("Idempotency-Key", idempotency_key.as_str());
        let is_last = attempt >= config.max_retries;

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return RetryOutcome::Success(response);
                }
                if is_last || !is_transient_status(status) {
                    return RetryOutcome::HttpError {
                        attempts: attempt + 1,
                        response,
                    };
                }
                let delay = retry_delay(attempt, config, Some(response.headers()));
                tracing::debug!(
                    status = %status,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "retrying authority call after error status"
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                if is_last {
                    return RetryOutcome::Transport {
                        attempts: attempt + 1,
                        source,
                    };
                }
                let delay = retry_delay(attempt, config, None);
                tracing::debug!(
                    error = %source,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "retrying authority call after transport error"
                );
                tokio::time::sleep(delay).await;
            }
        }

        attempt += 1;
    }
}
