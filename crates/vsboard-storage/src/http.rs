//! Sequential GET client for the Reddit endpoints. Failed requests are retried
//! a bounded number of times; a 429 waits at least as long as `Retry-After`,
//! and an exhausted `x-ratelimit-remaining` quota pauses until the window resets.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// 5xx and 429 are worth another try; everything else is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Seconds from a `Retry-After` header. HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// How long to hold off before the next request when the current window's
/// quota is used up. Reddit sends `remaining` as a float.
pub fn quota_pause(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name)?.to_str().ok()?.trim().parse::<f64>().ok();
    let remaining = header(RATELIMIT_REMAINING)?;
    if remaining >= 1.0 {
        return None;
    }
    let reset = header(RATELIMIT_RESET).unwrap_or(1.0).clamp(0.0, 3600.0);
    Some(Duration::from_secs_f64(reset))
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Exponential delay for retry number `attempt`, raised to the server's hint
    /// when it asks for longer, and never above `max_delay`.
    pub fn delay(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        let exponential = self.base_delay.saturating_mul(factor);
        exponential.max(hint.unwrap_or_default()).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of one request. `Retry` carries the server's wait hint, if any.
enum Attempt {
    Done(Vec<u8>),
    Retry {
        error: FetchError,
        hint: Option<Duration>,
    },
    Fail(FetchError),
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, source_id: &str, url: &str) -> Result<Vec<u8>, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_id: &str,
        url: &str,
    ) -> Result<T, FetchError> {
        let body = self.fetch_bytes(source_id, url).await?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retries = 0usize;
        loop {
            match self.attempt(url).await {
                Attempt::Done(body) => return Ok(body),
                Attempt::Fail(error) => return Err(error),
                Attempt::Retry { error, .. } if retries >= self.backoff.max_retries => {
                    return Err(error)
                }
                Attempt::Retry { error, hint } => {
                    let wait = self.backoff.delay(retries, hint);
                    debug!(error = %error, retry = retries + 1, wait_ms = wait.as_millis() as u64, "retrying");
                    tokio::time::sleep(wait).await;
                    retries += 1;
                }
            }
        }
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) if is_retryable_error(&err) => {
                return Attempt::Retry {
                    error: err.into(),
                    hint: None,
                }
            }
            Err(err) => return Attempt::Fail(err.into()),
        };

        let status = resp.status();
        if status.is_success() {
            let pause = quota_pause(resp.headers());
            let body = match resp.bytes().await {
                Ok(body) => body.to_vec(),
                Err(err) => return Attempt::Fail(err.into()),
            };
            if let Some(pause) = pause {
                let pause = pause.min(self.backoff.max_delay);
                warn!(pause_ms = pause.as_millis() as u64, "rate-limit quota exhausted, pausing");
                tokio::time::sleep(pause).await;
            }
            return Attempt::Done(body);
        }

        let error = FetchError::HttpStatus {
            status: status.as_u16(),
            url: resp.url().to_string(),
        };
        if is_retryable_status(status) {
            Attempt::Retry {
                error,
                hint: retry_after(resp.headers()),
            }
        } else {
            Attempt::Fail(error)
        }
    }
}
