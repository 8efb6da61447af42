//! Request coordination: cache lookup, single-flight dedup and bounded fan-out.
//!
//! Concurrent calls with the same fingerprint share one in-flight pipeline
//! run. The first caller (the leader) spawns the run as a task and registers a
//! shared handle to it; later callers await a clone of the handle and receive
//! the same result, failures included. The task removes its entry when it
//! finishes, even if every caller has stopped waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::classify::ErrorClassifier;
use crate::config::HarvestConfig;
use crate::error::{BuildError, Fault};
use crate::fetch::{AccessPolicy, BoundedFetcher, Fetcher, HttpFetcher};
use crate::fingerprint::Fingerprint;
use crate::normalize::normalize;
use crate::strategy::{ChainOutcome, StrategyChain};
use crate::types::{
    CacheCleared, CacheControl, Extraction, ExtractionRequest, ExtractionResult, Target,
};

type SharedRun = Shared<BoxFuture<'static, ExtractionResult>>;

/// A fault plus the page it was raised against, if one was fetched.
struct Failed {
    fault: Fault,
    content: Option<String>,
}

impl From<Fault> for Failed {
    fn from(fault: Fault) -> Self {
        Self {
            fault,
            content: None,
        }
    }
}

/// Entry point of the pipeline. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Extractor {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    policy: AccessPolicy,
    chain: StrategyChain,
    classifier: ErrorClassifier,
    cache: Arc<ResultCache>,
    in_flight: Mutex<HashMap<Fingerprint, SharedRun>>,
    max_concurrency: usize,
    default_timeout: Duration,
}

/// Assembles an [`Extractor`]; any part not supplied is built from config.
pub struct ExtractorBuilder {
    config: HarvestConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    chain: Option<StrategyChain>,
    cache: Option<Arc<ResultCache>>,
}

impl ExtractorBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn chain(mut self, chain: StrategyChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Share a cache between extractors.
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Extractor, BuildError> {
        let config = self.config;
        let max_concurrency = config.max_concurrency.max(1);
        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config)?),
        };
        let fetcher: Arc<dyn Fetcher> = Arc::new(BoundedFetcher::new(fetcher, max_concurrency));
        let chain = match self.chain {
            Some(chain) => chain,
            None => StrategyChain::builtin(&config.chain)?,
        };
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(ResultCache::new(config.cache_ttl(), config.cache_max_entries))
        });
        let default_timeout = config.timeout();

        Ok(Extractor {
            inner: Arc::new(Inner {
                policy: AccessPolicy::new(Arc::clone(&fetcher), config.user_agent.clone()),
                fetcher,
                chain,
                classifier: ErrorClassifier::new(config.snapshot_limit, config.diagnostics_dir),
                cache,
                in_flight: Mutex::new(HashMap::new()),
                max_concurrency,
                default_timeout,
            }),
        })
    }
}

impl Extractor {
    pub fn builder(config: HarvestConfig) -> ExtractorBuilder {
        ExtractorBuilder {
            config,
            fetcher: None,
            chain: None,
            cache: None,
        }
    }

    /// Extractor with the HTTP fetcher and built-in strategies.
    pub fn from_config(config: HarvestConfig) -> Result<Self, BuildError> {
        Self::builder(config).build()
    }

    /// Request for `target` carrying the configured default deadline.
    pub fn request(&self, target: Target) -> ExtractionRequest {
        ExtractionRequest::new(target).with_timeout(self.inner.default_timeout)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// Extract records for one request.
    ///
    /// Serves fresh cache entries unless the request forces a refresh, and
    /// otherwise joins or leads the in-flight run for its fingerprint.
    pub async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult {
        let key = request.fingerprint();

        if request.cache == CacheControl::UseCache {
            if let Some(hit) = self.inner.cache.get(&key) {
                debug!(target = %request.target, fingerprint = %key, "cache hit");
                let mut extraction = (*hit).clone();
                extraction.from_cache = true;
                return Ok(extraction);
            }
        }

        self.join_or_lead(key, request).await
    }

    /// Extract many requests with at most `max_concurrency` in flight.
    ///
    /// Results come back in input order.
    pub async fn extract_many(&self, requests: &[ExtractionRequest]) -> Vec<ExtractionResult> {
        stream::iter(requests)
            .map(|request| self.extract(request))
            .buffered(self.inner.max_concurrency)
            .collect()
            .await
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) -> CacheCleared {
        let entries = self.inner.cache.clear();
        info!(entries, "cache cleared");
        CacheCleared {
            cleared: true,
            entries,
        }
    }

    fn join_or_lead(&self, key: Fingerprint, request: &ExtractionRequest) -> SharedRun {
        let mut table = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(run) = table.get(&key) {
            debug!(target = %request.target, fingerprint = %key, "joining in-flight extraction");
            return run.clone();
        }

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        };
        let inner = Arc::clone(&self.inner);
        let task_request = request.clone();
        let task_key = key.clone();
        // The table lock is held until the entry is inserted, so the guard
        // cannot remove it before it exists.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            inner.lead(task_key, &task_request).await
        });

        let inner = Arc::clone(&self.inner);
        let url = request.target.canonical();
        let run = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(inner.classifier.classify(
                    Fault::Aborted {
                        url,
                        reason: e.to_string(),
                    },
                    None,
                )),
            }
        }
        .boxed()
        .shared();

        table.insert(key, run.clone());
        run
    }
}

/// Removes an in-flight entry when its task ends, panics included.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: Fingerprint,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl Inner {
    async fn lead(&self, key: Fingerprint, request: &ExtractionRequest) -> ExtractionResult {
        let deadline = request.options.timeout;
        let outcome = tokio::time::timeout(deadline, self.run(request))
            .await
            .unwrap_or_else(|_| Err(Fault::Deadline(deadline).into()));

        match outcome {
            Ok(extraction) => {
                self.cache.put_default(key, extraction.clone());
                Ok(extraction)
            }
            Err(Failed { fault, content }) => {
                let err = self.classifier.classify(fault, content.as_deref());
                warn!(
                    target = %request.target,
                    kind = %err.kind(),
                    diagnostic = err.diagnostic_ref().as_deref().unwrap_or("-"),
                    "extraction failed: {}",
                    err.message()
                );
                Err(err)
            }
        }
    }

    async fn run(&self, request: &ExtractionRequest) -> Result<Extraction, Failed> {
        let target = &request.target;

        if request.options.respect_access_policy && !self.policy.allows(target, &request.options).await
        {
            return Err(Fault::PolicyDenied {
                url: target.canonical(),
            }
            .into());
        }

        let page = self
            .fetcher
            .fetch(target, &request.options)
            .await
            .map_err(Fault::from)?;

        let (strategy, payload) = match self.chain.run(&page.content) {
            ChainOutcome::Matched { strategy, payload } => (strategy, payload),
            ChainOutcome::Exhausted {
                attempts,
                last_diagnostic,
            } => {
                return Err(Failed {
                    fault: Fault::StructureChanged {
                        attempts,
                        last_diagnostic,
                    },
                    content: Some(page.content),
                })
            }
        };

        let normalized = normalize(&payload, target);
        if normalized.records.is_empty() && normalized.seen > 0 {
            return Err(Failed {
                fault: Fault::EmptyResult {
                    strategy: strategy.to_string(),
                    items: normalized.seen,
                },
                content: Some(page.content),
            });
        }
        if normalized.dropped > 0 {
            warn!(target = %target, dropped = normalized.dropped, "records dropped during normalization");
        }

        info!(
            target = %target,
            strategy = %strategy,
            records = normalized.records.len(),
            "extraction succeeded"
        );
        Ok(Extraction {
            target: target.canonical(),
            records: normalized.records,
            strategy,
            latency: page.latency,
            from_cache: false,
        })
    }
}
