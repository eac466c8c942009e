//! Resilient call gateway.
//!
//! Every outbound request (chat completions, embeddings, image generation,
//! model listing, page fetches for images) runs through [`invoke`], which
//! retries transient failures with randomized exponential backoff and stops
//! on the first terminal error.
//!
//! # Classification
//!
//! | Signal | Kind |
//! |--------|------|
//! | timeout, connect error, HTTP 408/409/429/5xx, "try again" body | transient, retried |
//! | other HTTP 4xx | invalid request, returned immediately |
//! | success with undecodable body | invalid response, returned immediately |

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::GatewayError;

/// Retry bounds for one class of calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_wait: Duration::from_millis(config.min_wait_ms),
            max_wait: Duration::from_millis(config.max_wait_ms.max(config.min_wait_ms)),
            max_elapsed: (config.max_elapsed_secs > 0)
                .then(|| Duration::from_secs(config.max_elapsed_secs)),
        }
    }

    /// A policy that makes exactly `max_attempts` attempts with no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
            max_elapsed: None,
        }
    }

    /// Range the wait before `attempt` (1-based) is drawn from.
    pub fn wait_bounds(&self, attempt: u32) -> (Duration, Duration) {
        if attempt <= 1 {
            return (Duration::ZERO, Duration::ZERO);
        }
        let exponent = (attempt - 2).min(16);
        let grown = self.min_wait.saturating_mul(1 << exponent);
        let high = grown.clamp(self.min_wait, self.max_wait);
        (self.min_wait, high)
    }

    /// Randomized wait before `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let (low, high) = self.wait_bounds(attempt);
        let low_ms = low.as_millis() as u64;
        let high_ms = high.as_millis() as u64;
        if high_ms <= low_ms {
            return low;
        }
        Duration::from_millis(rand::thread_rng().gen_range(low_ms..=high_ms))
    }
}

/// Run `call` under `policy`.
///
/// The closure receives the 1-based attempt number and must build a fresh
/// request each time. Terminal errors are returned after a single attempt;
/// transient errors are retried until the attempt cap or the elapsed bound
/// is reached, after which the last error is returned.
pub async fn invoke<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let started = Instant::now();
    let mut attempt = 1;

    loop {
        let begun = Instant::now();
        let err = match call(attempt).await {
            Ok(value) => {
                debug!(
                    operation,
                    attempt,
                    elapsed_secs = begun.elapsed().as_secs_f64(),
                    "call completed"
                );
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            warn!(operation, attempt, error = %err, "giving up after final attempt");
            return Err(err);
        }

        let wait = policy.backoff(attempt + 1);
        if let Some(limit) = policy.max_elapsed {
            if started.elapsed() + wait > limit {
                warn!(operation, attempt, error = %err, "retry time budget exhausted");
                return Err(err);
            }
        }

        warn!(
            operation,
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

/// Map a non-success HTTP status to an error kind.
pub fn classify_status(status: StatusCode, body: &str) -> GatewayError {
    let message = format!("{} {}", status, truncate(body, 300));
    let code = status.as_u16();
    if status.is_server_error() || matches!(code, 408 | 409 | 429) {
        return GatewayError::TransientUpstream(message);
    }
    if body.to_ascii_lowercase().contains("try again") {
        return GatewayError::TransientUpstream(message);
    }
    GatewayError::InvalidRequest(message)
}

/// Send one request and decode its JSON body.
pub async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, GatewayError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| GatewayError::InvalidResponse(format!("Invalid response: {e}")))
}

/// Send one request and return the raw body bytes.
pub async fn send_bytes(request: reqwest::RequestBuilder) -> Result<Vec<u8>, GatewayError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }
    Ok(response.bytes().await?.to_vec())
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
