//! Ordered extraction strategies and the chain that runs them.
//!
//! Every strategy reports a tagged [`StrategyOutcome`]. "Did not find data"
//! is `NoMatch`, never an error, and is distinct from `Malformed`, where data
//! was found but could not be used. The chain stops at the first `Matched`.
//!
//! Strategies are synchronous: `scraper::Html` is `!Send`, so documents are
//! parsed and dropped inside `attempt` and never cross an `.await`.

pub mod embedded;
pub mod pattern;
pub mod schema;
pub mod structural;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::types::StrategyId;

pub use embedded::EmbeddedStrategy;
pub use pattern::PatternStrategy;
pub use schema::{EmbedSchema, FieldPath, IdEncoding};
pub use structural::{CardSelectors, ScrapedCard, StructuralStrategy};

/// Candidate payload produced by a strategy, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Items accepted by an embedded-JSON schema.
    Embedded {
        schema: EmbedSchema,
        items: Vec<Value>,
    },
    /// Cards assembled from the document tree.
    Scraped(Vec<ScrapedCard>),
}

impl RawPayload {
    pub fn len(&self) -> usize {
        match self {
            RawPayload::Embedded { items, .. } => items.len(),
            RawPayload::Scraped(cards) => cards.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Matched(RawPayload),
    NoMatch,
    /// Data was found but could not be used; carries a diagnostic.
    Malformed(String),
}

/// One way of turning page content into a payload.
pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    fn attempt(&self, content: &str) -> StrategyOutcome;
}

/// Selectors, patterns, schemas and thresholds for the built-in strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// CSS selectors for the well-known data element, tried in order.
    pub embed_selectors: Vec<String>,
    /// Regexes over raw content; capture group 1 must hold the JSON text.
    pub patterns: Vec<String>,
    pub schemas: Vec<EmbedSchema>,
    pub cards: CardSelectors,
    /// Complete cards needed before the structural strategy matches.
    pub min_cards: usize,
    /// Treat a recognized but empty record array as a match.
    pub allow_empty_embed: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            embed_selectors: vec!["script#data-deferred-state-0".to_string()],
            patterns: vec![
                r#"(?is)<script[^>]*\bid=["']data-state["'][^>]*>(.*?)</script>"#.to_string(),
                r#"(?is)<script[^>]*\bid=["']data-deferred-state-\d+["'][^>]*>(.*?)</script>"#
                    .to_string(),
                r#"(?is)<script[^>]*\bid=["']__NEXT_DATA__["'][^>]*>(.*?)</script>"#.to_string(),
                r#"(?is)<script[^>]*\bid=["']initial-data["'][^>]*>(.*?)</script>"#.to_string(),
                r#"(?is)<script[^>]*\btype=["']application/json["'][^>]*>(.*?)</script>"#
                    .to_string(),
            ],
            schemas: EmbedSchema::builtin(),
            cards: CardSelectors::default(),
            min_cards: 1,
            allow_empty_embed: true,
        }
    }
}

/// Result of running the whole chain over one page.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Matched {
        strategy: StrategyId,
        payload: RawPayload,
    },
    Exhausted {
        attempts: usize,
        /// Per-strategy notes, in the order tried.
        last_diagnostic: String,
    },
}

/// Strategies in strict priority order.
pub struct StrategyChain {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Embedded, then pattern, then structural.
    pub fn builtin(config: &ChainConfig) -> Result<Self, BuildError> {
        Ok(Self::new(vec![
            Box::new(EmbeddedStrategy::new(config)?),
            Box::new(PatternStrategy::new(config)?),
            Box::new(StructuralStrategy::new(config)?),
        ]))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run strategies in order until one matches.
    ///
    /// A panicking strategy is recorded as malformed and the chain moves on.
    pub fn run(&self, content: &str) -> ChainOutcome {
        let mut notes = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let id = strategy.id();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy.attempt(content)))
                .unwrap_or_else(|payload| {
                    StrategyOutcome::Malformed(format!(
                        "strategy panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                });

            match outcome {
                StrategyOutcome::Matched(payload) => {
                    info!(strategy = %id, records = payload.len(), "strategy matched");
                    return ChainOutcome::Matched {
                        strategy: id,
                        payload,
                    };
                }
                StrategyOutcome::NoMatch => {
                    debug!(strategy = %id, "no match");
                    notes.push(format!("{id}: no match"));
                }
                StrategyOutcome::Malformed(diagnostic) => {
                    warn!(strategy = %id, %diagnostic, "malformed payload");
                    notes.push(format!("{id}: {diagnostic}"));
                }
            }
        }

        ChainOutcome::Exhausted {
            attempts: self.strategies.len(),
            last_diagnostic: if notes.is_empty() {
                "no strategies configured".to_string()
            } else {
                notes.join("; ")
            },
        }
    }
}

pub(crate) fn compile_selector(raw: &str) -> Result<scraper::Selector, BuildError> {
    scraper::Selector::parse(raw).map_err(|e| BuildError::Selector {
        selector: raw.to_string(),
        reason: e.to_string(),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        id: StrategyId,
        outcome: StrategyOutcome,
        calls: Arc<AtomicUsize>,
    }

    impl Strategy for Fixed {
        fn id(&self) -> StrategyId {
            self.id
        }

        fn attempt(&self, _content: &str) -> StrategyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    struct Panics;

    impl Strategy for Panics {
        fn id(&self) -> StrategyId {
            StrategyId::Embedded
        }

        fn attempt(&self, _content: &str) -> StrategyOutcome {
            panic!("selector blew up")
        }
    }

    fn fixed(id: StrategyId, outcome: StrategyOutcome) -> (Box<dyn Strategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Fixed {
                id,
                outcome,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }

    fn cards() -> RawPayload {
        RawPayload::Scraped(vec![ScrapedCard {
            id: "1".into(),
            label: "Loft".into(),
            secondary: None,
            link: None,
            media: None,
        }])
    }

    #[test]
    fn test_stops_at_first_match() {
        let (a, a_calls) = fixed(StrategyId::Embedded, StrategyOutcome::Matched(cards()));
        let (b, b_calls) = fixed(StrategyId::Pattern, StrategyOutcome::Matched(cards()));
        let chain = StrategyChain::new(vec![a, b]);

        let outcome = chain.run("<html></html>");
        assert!(matches!(
            outcome,
            ChainOutcome::Matched {
                strategy: StrategyId::Embedded,
                ..
            }
        ));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_and_no_match_advance() {
        let (a, _) = fixed(
            StrategyId::Embedded,
            StrategyOutcome::Malformed("bad json".into()),
        );
        let (b, _) = fixed(StrategyId::Pattern, StrategyOutcome::NoMatch);
        let (c, c_calls) = fixed(StrategyId::Structural, StrategyOutcome::Matched(cards()));
        let chain = StrategyChain::new(vec![a, b, c]);

        match chain.run("") {
            ChainOutcome::Matched { strategy, .. } => assert_eq!(strategy, StrategyId::Structural),
            other => panic!("expected match, got {other:?}"),
        }
        assert_eq!(c_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exhaustion_aggregates_diagnostics() {
        let (a, _) = fixed(StrategyId::Embedded, StrategyOutcome::NoMatch);
        let (b, _) = fixed(
            StrategyId::Pattern,
            StrategyOutcome::Malformed("truncated JSON".into()),
        );
        let chain = StrategyChain::new(vec![a, b]);

        match chain.run("") {
            ChainOutcome::Exhausted {
                attempts,
                last_diagnostic,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_diagnostic.contains("embedded: no match"));
                assert!(last_diagnostic.contains("pattern: truncated JSON"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_panicking_strategy_is_malformed() {
        let (b, b_calls) = fixed(StrategyId::Pattern, StrategyOutcome::Matched(cards()));
        let chain = StrategyChain::new(vec![Box::new(Panics), b]);

        assert!(matches!(chain.run(""), ChainOutcome::Matched { .. }));
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_config_builds() {
        let chain = StrategyChain::builtin(&ChainConfig::default()).unwrap();
        assert_eq!(chain.len(), 3);
    }
}
