//! HTTP plumbing shared by every source
//!
//! - [`HttpFetcher`]: request loop with retry, exponential backoff and
//!   error classification
//! - [`RequestPacer`]: minimum gap between requests to third-party servers

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::{ConfigError, SourceError};

pub const USER_AGENT: &str = concat!("sanction-watch/", env!("CARGO_PKG_VERSION"));

/// Statuses worth another attempt
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Build the shared HTTP client
pub fn build_http_client(timeout: Duration) -> Result<Client, ConfigError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// GET, HEAD and OPTIONS may always be repeated
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

// =============================================================================
// Retry policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// `base * 2^retry`, capped, plus up to 25% jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        let jitter_cap = (exp.as_millis() / 4) as u64;
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        exp + Duration::from_millis(jitter)
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Retrying request sender bound to one source
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    source_id: String,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(http: Client, source_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            http,
            source_id: source_id.into(),
            policy,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Send a request, retrying transport failures and retryable statuses.
    ///
    /// `build` is called once per attempt. Non-idempotent methods get a
    /// single attempt unless `retryable` is set. 401/403 and other 4xx
    /// responses fail immediately.
    pub async fn send(
        &self,
        method: Method,
        retryable: bool,
        cancel: &CancelToken,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Response, SourceError> {
        let max_attempts = if retryable || is_idempotent(&method) {
            self.policy.max_retries + 1
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                result = build(&self.http).send() => result,
            };

            let retry_after = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let code = status.as_u16();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(SourceError::Unauthorized {
                            source_id: self.source_id.clone(),
                            status: code,
                        });
                    }

                    if !RETRYABLE_STATUSES.contains(&code) || attempt >= max_attempts {
                        return Err(SourceError::Status {
                            source_id: self.source_id.clone(),
                            status: code,
                            attempts: attempt,
                        });
                    }

                    warn!(
                        source_id = %self.source_id,
                        %method,
                        status = code,
                        attempt,
                        max_attempts,
                        "Retryable HTTP status"
                    );

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retry_after_header(&response)
                    } else {
                        None
                    }
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        return Err(SourceError::Transport {
                            source_id: self.source_id.clone(),
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }

                    warn!(
                        source_id = %self.source_id,
                        %method,
                        error = %e,
                        attempt,
                        max_attempts,
                        "Request failed, retrying"
                    );
                    None
                }
            };

            let wait = retry_after
                .map(|d| d.min(self.policy.max_delay))
                .unwrap_or_else(|| self.policy.delay_for(attempt - 1));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                _ = sleep(wait) => {}
            }
        }
    }

    /// Read the whole body, honoring cancellation
    pub async fn read_body(
        &self,
        response: Response,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, SourceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.cancelled()),
            body = response.bytes() => body.map(|b| b.to_vec()).map_err(|e| SourceError::Transport {
                source_id: self.source_id.clone(),
                attempts: 1,
                message: format!("failed to read body: {}", e),
            }),
        }
    }

    fn cancelled(&self) -> SourceError {
        SourceError::Cancelled {
            source_id: self.source_id.clone(),
        }
    }
}

/// `Retry-After` given in seconds
fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

// =============================================================================
// Pacing
// =============================================================================

/// Enforces a minimum delay between consecutive requests
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until at least `delay` has passed since the previous request
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
