//! Page retrieval and the access policy checked before it.

pub mod http;
pub mod robots;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::FetchError;
use crate::types::{FetchOptions, FetchResult, Target};

pub use http::HttpFetcher;
pub use robots::{AccessPolicy, RobotsTxt};

/// A single network retrieval of a target.
///
/// Implementations own their retry policy; callers see either a page or the
/// fault left after retries were exhausted.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, target: &Target, options: &FetchOptions)
        -> Result<FetchResult, FetchError>;
}

/// Caps how many calls into the wrapped fetcher run at once.
///
/// Page fetches and robots.txt lookups share the same limit.
pub struct BoundedFetcher {
    inner: Arc<dyn Fetcher>,
    permits: Semaphore,
}

impl BoundedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, limit: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(limit.max(1)),
        }
    }
}

#[async_trait]
impl Fetcher for BoundedFetcher {
    async fn fetch(
        &self,
        target: &Target,
        options: &FetchOptions,
    ) -> Result<FetchResult, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Transport {
                url: target.canonical(),
                message: "fetch pool closed".to_string(),
            })?;
        self.inner.fetch(target, options).await
    }
}
