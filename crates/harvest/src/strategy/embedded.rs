//! Structured-embed extraction: the well-known data element, parsed as JSON.
//!
//! Cheapest and most precise strategy while the page encoding is the one we
//! know. The element is located by a stable attribute and its text projected
//! through the configured schemas.

use scraper::{Html, Selector};
use serde_json::Value;

use super::schema::{project_payload, EmbedSchema};
use super::{compile_selector, ChainConfig, Strategy, StrategyOutcome};
use crate::error::BuildError;
use crate::types::StrategyId;

pub struct EmbeddedStrategy {
    selectors: Vec<(String, Selector)>,
    schemas: Vec<EmbedSchema>,
    allow_empty: bool,
}

impl EmbeddedStrategy {
    pub fn new(config: &ChainConfig) -> Result<Self, BuildError> {
        let selectors = config
            .embed_selectors
            .iter()
            .map(|raw| compile_selector(raw).map(|sel| (raw.clone(), sel)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            selectors,
            schemas: config.schemas.clone(),
            allow_empty: config.allow_empty_embed,
        })
    }
}

impl Strategy for EmbeddedStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Embedded
    }

    fn attempt(&self, content: &str) -> StrategyOutcome {
        let document = Html::parse_document(content);

        let found = self.selectors.iter().find_map(|(raw, sel)| {
            document
                .select(sel)
                .next()
                .map(|el| (raw, el.text().collect::<String>()))
        });
        let Some((selector, text)) = found else {
            return StrategyOutcome::NoMatch;
        };

        let text = text.trim();
        if text.is_empty() {
            return StrategyOutcome::Malformed(format!("{selector} is empty"));
        }

        match serde_json::from_str::<Value>(text) {
            Ok(root) => project_payload(&self.schemas, &root, self.allow_empty),
            Err(e) => StrategyOutcome::Malformed(format!("{selector} holds invalid JSON: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RawPayload;

    fn strategy() -> EmbeddedStrategy {
        EmbeddedStrategy::new(&ChainConfig::default()).unwrap()
    }

    fn page(script: &str) -> String {
        format!(
            r#"<html><head></head><body>
            <script id="data-deferred-state-0" type="application/json">{script}</script>
            </body></html>"#
        )
    }

    #[test]
    fn test_matches_search_results() {
        let html = page(
            r#"{"niobeClientData": [["StaysSearch", {"data": {"presentation": {"staysSearch": {"results": {
                "searchResults": [
                    {"demandStayListing": {"id": "RGVtYW5kU3RheUxpc3Rpbmc6MTIz"}, "title": "Sea view loft"}
                ]
            }}}}}]]}"#,
        );
        match strategy().attempt(&html) {
            StrategyOutcome::Matched(RawPayload::Embedded { schema, items }) => {
                assert_eq!(schema.name, "stays_search");
                assert_eq!(items.len(), 1);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_results_still_match() {
        let html = page(
            r#"{"niobeClientData": [["StaysSearch", {"data": {"presentation": {"staysSearch": {"results": {
                "searchResults": []
            }}}}}]]}"#,
        );
        match strategy().attempt(&html) {
            StrategyOutcome::Matched(payload) => assert!(payload.is_empty()),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_element_is_no_match() {
        let outcome = strategy().attempt("<html><body><p>Just a page</p></body></html>");
        assert_eq!(outcome, StrategyOutcome::NoMatch);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        match strategy().attempt(&page(r#"{"niobeClientData": [["#)) {
            StrategyOutcome::Malformed(msg) => assert!(msg.contains("invalid JSON")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_shape_is_malformed() {
        match strategy().attempt(&page(r#"{"niobeClientData": [["Other", {"data": {}}]]}"#)) {
            StrategyOutcome::Malformed(msg) => assert!(msg.contains("no known schema")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_results_rejected_when_disallowed() {
        let config = ChainConfig {
            allow_empty_embed: false,
            ..ChainConfig::default()
        };
        let strategy = EmbeddedStrategy::new(&config).unwrap();
        let html = page(
            r#"{"niobeClientData": [["StaysSearch", {"data": {"presentation": {"staysSearch": {"results": {
                "searchResults": []
            }}}}}]]}"#,
        );
        assert!(matches!(strategy.attempt(&html), StrategyOutcome::Malformed(_)));
    }
}
