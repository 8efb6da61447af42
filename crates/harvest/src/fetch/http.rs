//! Async HTTP fetcher wrapping reqwest.
//!
//! Not a browser, just HTTP requests. Handles redirects, header shaping,
//! retry with exponential backoff on transport errors and 5xx, and an
//! HTTP/1.1 fallback for servers that choke on HTTP/2 negotiation. 4xx is
//! returned immediately.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tracing::{info, warn};

use super::Fetcher;
use crate::config::HarvestConfig;
use crate::error::{BuildError, FetchError};
use crate::types::{FetchOptions, FetchResult, Target};

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// HTTP fetcher for the extraction pipeline.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
    user_agent: String,
    max_attempts: u32,
    base_delay: Duration,
}

impl HttpFetcher {
    /// Build a fetcher from configuration.
    ///
    /// Idle connections are not pooled, so every attempt opens a fresh one.
    pub fn new(config: &HarvestConfig) -> Result<Self, BuildError> {
        let build = |h1_only: bool| {
            let mut builder = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(5))
                .pool_max_idle_per_host(0);
            if h1_only {
                builder = builder.http1_only();
            }
            builder
                .build()
                .map_err(|e| BuildError::Client(error_chain(&e)))
        };

        Ok(Self {
            client: build(false)?,
            h1_client: build(true)?,
            user_agent: config.user_agent.clone(),
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Default headers with per-request overrides replacing them by name.
    fn headers(&self, overrides: &[(String, String)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let defaults = [
            (header::USER_AGENT, self.user_agent.as_str()),
            (header::ACCEPT, ACCEPT),
            (header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE),
            (header::CACHE_CONTROL, "no-cache"),
        ];
        for (name, value) in defaults {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => warn!(header = %name, "default header value is not valid, skipped"),
            }
        }

        for (name, value) in overrides {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "invalid header override, skipped"),
            }
        }
        headers
    }

    async fn attempt(
        &self,
        client: &reqwest::Client,
        url: &str,
        headers: HeaderMap,
    ) -> Result<FetchResult, FetchError> {
        let resp = client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| transport(url, &e))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let content = resp.text().await.map_err(|e| transport(url, &e))?;
        Ok(FetchResult {
            content,
            status,
            final_url,
            latency: Duration::ZERO,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// GET `target` within `options.timeout`, retries included.
    async fn fetch(
        &self,
        target: &Target,
        options: &FetchOptions,
    ) -> Result<FetchResult, FetchError> {
        let url = target.canonical();
        let headers = self.headers(&options.headers);
        let started = Instant::now();
        let deadline = started + options.timeout;
        let mut attempts = 0u32;
        let mut use_h1 = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::Timeout { url, attempts });
            }
            attempts += 1;

            let client = if use_h1 { &self.h1_client } else { &self.client };
            let outcome =
                tokio::time::timeout(remaining, self.attempt(client, &url, headers.clone())).await;

            let err = match outcome {
                Ok(Ok(mut page)) => {
                    page.latency = started.elapsed();
                    info!(
                        url = %url,
                        status = page.status,
                        attempts,
                        latency_ms = page.latency.as_millis() as u64,
                        bytes = page.content.len(),
                        "fetched"
                    );
                    return Ok(page);
                }
                Ok(Err(err)) => err,
                Err(_) => return Err(FetchError::Timeout { url, attempts }),
            };

            if !err.is_transient() || attempts >= self.max_attempts {
                return Err(err);
            }

            if let FetchError::Transport { message, .. } = &err {
                if !use_h1 && looks_like_protocol_error(message) {
                    use_h1 = true;
                }
            }

            let delay = backoff(self.base_delay, attempts);
            if delay >= deadline.saturating_duration_since(Instant::now()) {
                return Err(FetchError::Timeout { url, attempts });
            }
            warn!(url = %url, attempt = attempts, error = %err, delay_ms = delay.as_millis() as u64, "retrying fetch");
            tokio::time::sleep(delay).await;
        }
    }
}

/// `base * 2^(attempt-1)`.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

fn looks_like_protocol_error(message: &str) -> bool {
    message.contains("http2") || message.contains("protocol") || message.contains("connection closed")
}

fn transport(url: &str, err: &reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        message: error_chain(err),
    }
}

/// Error text including its sources, which reqwest keeps out of `Display`.
fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
