//! Harvest — resilient record extraction from HTML pages whose embedded data
//! format drifts without notice.

pub mod cache;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod fingerprint;
pub mod normalize;
pub mod strategy;
pub mod types;

pub use cache::ResultCache;
pub use classify::{Diagnostic, ErrorClassifier, Stage};
pub use config::{ConfigError, HarvestConfig};
pub use coordinator::{Extractor, ExtractorBuilder};
pub use error::{BuildError, ErrorKind, ExtractionError, Fault, FetchError};
pub use fetch::{AccessPolicy, BoundedFetcher, Fetcher, HttpFetcher, RobotsTxt};
pub use fingerprint::Fingerprint;
pub use normalize::{normalize, Normalized};
pub use strategy::{ChainConfig, ChainOutcome, Strategy, StrategyChain, StrategyOutcome};
pub use types::*;
