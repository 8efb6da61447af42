//! Pattern-fallback extraction over raw page text.
//!
//! Fires when the well-known element is absent. Each regex describes a
//! container the target has used at some point (alternate ids, Next.js page
//! data, generic JSON scripts); the first capture whose JSON projects through
//! a known schema wins.

use regex::Regex;
use serde_json::Value;

use super::schema::{project_payload, EmbedSchema};
use super::{ChainConfig, Strategy, StrategyOutcome};
use crate::error::BuildError;
use crate::types::StrategyId;

pub struct PatternStrategy {
    patterns: Vec<Regex>,
    schemas: Vec<EmbedSchema>,
    allow_empty: bool,
}

impl PatternStrategy {
    pub fn new(config: &ChainConfig) -> Result<Self, BuildError> {
        let patterns = config
            .patterns
            .iter()
            .map(|raw| {
                Regex::new(raw).map_err(|source| BuildError::Pattern {
                    pattern: raw.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            schemas: config.schemas.clone(),
            allow_empty: config.allow_empty_embed,
        })
    }
}

impl Strategy for PatternStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Pattern
    }

    fn attempt(&self, content: &str) -> StrategyOutcome {
        let mut last_problem: Option<String> = None;

        for (idx, pattern) in self.patterns.iter().enumerate() {
            for caps in pattern.captures_iter(content) {
                let Some(body) = caps.get(1) else {
                    continue;
                };
                let text = body.as_str().trim();
                if text.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Value>(text) {
                    Ok(root) => match project_payload(&self.schemas, &root, self.allow_empty) {
                        StrategyOutcome::Malformed(reason) => {
                            last_problem = Some(format!("pattern #{idx}: {reason}"));
                        }
                        outcome => return outcome,
                    },
                    Err(e) => {
                        last_problem = Some(format!("pattern #{idx} captured invalid JSON: {e}"));
                    }
                }
            }
        }

        match last_problem {
            Some(reason) => StrategyOutcome::Malformed(reason),
            None => StrategyOutcome::NoMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RawPayload;

    fn strategy() -> PatternStrategy {
        PatternStrategy::new(&ChainConfig::default()).unwrap()
    }

    #[test]
    fn test_next_data_legacy_layout() {
        let html = r#"<html><body>
        <script id='__NEXT_DATA__' type='application/json'>
        {"props": {"pageProps": {"searchResults": {"sections": [
            {"items": [{"listing": {"id": 42, "name": "Treehouse", "city": "Ubud"}}]}
        ]}}}}
        </script></body></html>"#;

        match strategy().attempt(html) {
            StrategyOutcome::Matched(RawPayload::Embedded { schema, items }) => {
                assert_eq!(schema.name, "stays_search_legacy");
                assert_eq!(items.len(), 1);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_alternate_state_element() {
        let html = r#"<script id="data-state">{"niobeClientData": [["x", {"data": {"presentation": {"staysSearch": {"results": {"searchResults": [
            {"listing": {"id": "U3RheUxpc3Rpbmc6Nzc=", "name": "Barn"}}
        ]}}}}}]]}</script>"#;
        assert!(matches!(
            strategy().attempt(html),
            StrategyOutcome::Matched(RawPayload::Embedded { .. })
        ));
    }

    #[test]
    fn test_skips_unrelated_json_until_known_shape() {
        let html = r#"
        <script type="application/json">{"analytics": true}</script>
        <script type="application/json">{"props": {"pageProps": {"searchResults": {"sections": [{"items": [{"listing": {"id": 1, "name": "Hut"}}]}]}}}}</script>
        "#;
        assert!(matches!(
            strategy().attempt(html),
            StrategyOutcome::Matched(_)
        ));
    }

    #[test]
    fn test_no_candidate_is_no_match() {
        assert_eq!(
            strategy().attempt("<html><body>nothing here</body></html>"),
            StrategyOutcome::NoMatch
        );
    }

    #[test]
    fn test_only_broken_candidates_is_malformed() {
        let html = r#"<script id="__NEXT_DATA__">{"props": </script>"#;
        match strategy().attempt(html) {
            StrategyOutcome::Malformed(msg) => assert!(msg.contains("invalid JSON")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_pattern_rejected_at_build() {
        let config = ChainConfig {
            patterns: vec!["(unclosed".to_string()],
            ..ChainConfig::default()
        };
        assert!(matches!(
            PatternStrategy::new(&config),
            Err(BuildError::Pattern { .. })
        ));
    }
}
