//! Error types and the failure taxonomy surfaced to callers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::classify::Diagnostic;

/// Failures raised by a `Fetcher`.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("fetch of {url} exceeded its deadline after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },

    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Timeout { .. } | FetchError::InvalidTarget { .. } => false,
        }
    }
}

/// Failures while assembling an extractor from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Any fault raised while serving a request, before classification.
#[derive(thiserror::Error, Debug)]
pub enum Fault {
    #[error("{url} is disallowed by the site's robots.txt")]
    PolicyDenied { url: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("extraction deadline of {0:?} exceeded")]
    Deadline(Duration),

    #[error("no strategy recognised the page ({attempts} tried); last diagnostic: {last_diagnostic}")]
    StructureChanged {
        attempts: usize,
        last_diagnostic: String,
    },

    #[error("{strategy} matched {items} item(s) but none survived normalization")]
    EmptyResult { strategy: String, items: usize },

    #[error("extraction task for {url} did not complete: {reason}")]
    Aborted { url: String, reason: String },
}

/// Failure taxonomy exposed to the tool layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    PolicyDenied,
    Network,
    Timeout,
    StructureChanged,
    EmptyResult,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PolicyDenied => "PolicyDenied",
            ErrorKind::Network => "Network",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::StructureChanged => "StructureChanged",
            ErrorKind::EmptyResult => "EmptyResult",
        }
    }

    /// Faults worth retrying later, as opposed to policy or structure problems.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }

    /// "No results" rather than a genuine fault.
    pub fn is_no_results(&self) -> bool {
        matches!(self, ErrorKind::EmptyResult)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure. Cheap to clone so single-flight joiners can share it.
#[derive(Debug, Clone)]
pub struct ExtractionError {
    kind: ErrorKind,
    message: String,
    diagnostic: Option<Arc<Diagnostic>>,
    source: Arc<Fault>,
}

impl ExtractionError {
    pub(crate) fn new(kind: ErrorKind, fault: Fault, diagnostic: Option<Diagnostic>) -> Self {
        Self {
            kind,
            message: fault.to_string(),
            diagnostic: diagnostic.map(Arc::new),
            source: Arc::new(fault),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_deref()
    }

    /// Opaque handle of the attached diagnostic, if any.
    pub fn diagnostic_ref(&self) -> Option<String> {
        self.diagnostic.as_ref().map(|d| d.reference())
    }

    /// The unclassified fault this error wraps.
    pub fn fault(&self) -> &Fault {
        &self.source
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ExtractionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
