//! Request, fetch and result types shared across the pipeline.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;
use url::Url;

use crate::error::{ErrorKind, ExtractionError, FetchError};
use crate::fingerprint::Fingerprint;

/// Overall deadline applied when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Logical identity of a page: a locator plus its normalized query parameters.
///
/// Query pairs found on the parsed URL are folded into `params`, which are kept
/// sorted so that two targets differing only in parameter order compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    base: Url,
    params: Vec<(String, String)>,
}

impl Target {
    /// Parse an absolute http(s) URL into a target.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidTarget {
            target: raw.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_url(url)
    }

    /// Build a target from an already parsed URL.
    pub fn from_url(mut url: Url) -> Result<Self, FetchError> {
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(FetchError::InvalidTarget {
                target: url.to_string(),
                reason: "expected an absolute http(s) URL".to_string(),
            });
        }

        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { base: url, params })
    }

    /// Add a query parameter, keeping the parameter set normalized.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self.params.sort();
        self
    }

    /// Normalized query parameters, sorted by key then value.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// `scheme://host[:port]` of the target.
    pub fn origin(&self) -> String {
        self.base.origin().ascii_serialization()
    }

    /// Path component of the target.
    pub fn path(&self) -> &str {
        self.base.path()
    }

    /// Path plus the normalized query, as robots.txt rules see it.
    pub fn path_and_query(&self) -> String {
        let mut out = self.base.path().to_string();
        if !self.params.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.params.iter())
                .finish();
            out.push('?');
            out.push_str(&query);
        }
        out
    }

    /// Canonical string form; also the URL that gets fetched.
    pub fn canonical(&self) -> String {
        format!("{}{}", self.origin(), self.path_and_query())
    }

    /// Resolve a possibly relative reference against this target.
    pub fn resolve(&self, reference: &str) -> Option<String> {
        self.base.join(reference).ok().map(|u| u.to_string())
    }

    /// The same origin's `/robots.txt`.
    pub fn robots_target(&self) -> Self {
        let mut base = self.base.clone();
        base.set_path("/robots.txt");
        Self {
            base,
            params: Vec::new(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Per-call fetch behaviour. Not part of the request's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Overall deadline for the whole extraction, retries included.
    pub timeout: Duration,
    /// Header overrides, replacing defaults with the same name.
    pub headers: Vec<(String, String)>,
    /// Reject targets disallowed by the site's robots.txt before fetching.
    pub respect_access_policy: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            headers: Vec::new(),
            respect_access_policy: true,
        }
    }
}

/// Cache directive carried by a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControl {
    #[default]
    UseCache,
    /// Skip the cache read but still store a successful result.
    ForceRefresh,
}

/// One logical extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub target: Target,
    pub options: FetchOptions,
    pub cache: CacheControl,
}

impl ExtractionRequest {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            options: FetchOptions::default(),
            cache: CacheControl::default(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.push((name.into(), value.into()));
        self
    }

    pub fn respect_access_policy(mut self, respect: bool) -> Self {
        self.options.respect_access_policy = respect;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.cache = CacheControl::ForceRefresh;
        self
    }

    /// Identity fingerprint; ignores fetch options and cache control.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.target)
    }
}

/// Raw page returned by a fetcher.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: String,
    pub status: u16,
    pub final_url: String,
    pub latency: Duration,
}

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    Embedded,
    Pattern,
    Structural,
}

impl StrategyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::Embedded => "embedded",
            StrategyId::Pattern => "pattern",
            StrategyId::Structural => "structural",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical output record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

/// A successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Canonical target that was extracted.
    pub target: String,
    /// Normalized records; empty for a recognized zero-result page.
    pub records: Vec<Record>,
    pub strategy: StrategyId,
    pub latency: Duration,
    pub from_cache: bool,
}

/// Outcome of `Extractor::extract`.
pub type ExtractionResult = Result<Extraction, ExtractionError>;

/// Wire shape handed to the tool layer.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExtractOutput {
    #[serde(rename_all = "camelCase")]
    Records {
        records: Vec<Record>,
        strategy: StrategyId,
        from_cache: bool,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        error_kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        diagnostic_ref: Option<String>,
    },
}

impl From<&ExtractionResult> for ExtractOutput {
    fn from(result: &ExtractionResult) -> Self {
        match result {
            Ok(extraction) => ExtractOutput::Records {
                records: extraction.records.clone(),
                strategy: extraction.strategy,
                from_cache: extraction.from_cache,
            },
            Err(err) => ExtractOutput::Failure {
                error_kind: err.kind(),
                message: err.message().to_string(),
                diagnostic_ref: err.diagnostic_ref(),
            },
        }
    }
}

/// Response of `Extractor::clear_cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheCleared {
    pub cleared: bool,
    pub entries: usize,
}
