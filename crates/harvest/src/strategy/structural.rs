//! Structural-scrape extraction from repeating "card" containers.
//!
//! Last resort when no JSON payload can be found. Each container selector is
//! tried in order; within a container every field is looked up independently
//! so a missing price or image never loses the card. Only cards with both an
//! identifier and a label count.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::{compile_selector, ChainConfig, RawPayload, Strategy, StrategyOutcome};
use crate::error::BuildError;
use crate::types::StrategyId;

/// A card assembled from the document tree. Links may still be relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedCard {
    pub id: String,
    pub label: String,
    pub secondary: Option<String>,
    pub link: Option<String>,
    pub media: Option<String>,
}

/// Selector sets for card assembly, each tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSelectors {
    pub containers: Vec<String>,
    /// Attributes on the container that carry the identifier.
    pub id_attributes: Vec<String>,
    /// Regex applied to the card link when no id attribute is present.
    pub id_from_link: String,
    pub label: Vec<String>,
    pub secondary: Vec<String>,
    pub link: Vec<String>,
    pub media: Vec<String>,
}

impl Default for CardSelectors {
    fn default() -> Self {
        Self {
            containers: to_strings(&[
                r#"div[itemprop="itemListElement"]"#,
                r#"[data-testid="card-container"]"#,
                r#"[data-testid="listing-card"]"#,
                "[data-listing-id]",
            ]),
            id_attributes: to_strings(&["data-listing-id", "data-room-id", "data-id"]),
            id_from_link: r"/rooms/(?:plus/)?(\d+)".to_string(),
            label: to_strings(&[
                r#"[data-testid="listing-card-title"]"#,
                r#"meta[itemprop="name"]"#,
                r#"[id^="title_"]"#,
                "h3",
                "h2",
            ]),
            secondary: to_strings(&[
                r#"[data-testid="price-availability-row"]"#,
                r#"[data-testid="listing-card-subtitle"]"#,
                ".price",
            ]),
            link: to_strings(&[r#"meta[itemprop="url"]"#, "a[href]"]),
            media: to_strings(&["img[src]", "img[data-src]", "picture source[srcset]"]),
        }
    }
}

pub struct StructuralStrategy {
    containers: Vec<Selector>,
    id_attributes: Vec<String>,
    id_from_link: Regex,
    label: Vec<Selector>,
    secondary: Vec<Selector>,
    link: Vec<Selector>,
    media: Vec<Selector>,
    min_cards: usize,
}

impl StructuralStrategy {
    pub fn new(config: &ChainConfig) -> Result<Self, BuildError> {
        let cards = &config.cards;
        Ok(Self {
            containers: compile_all(&cards.containers)?,
            id_attributes: cards.id_attributes.clone(),
            id_from_link: Regex::new(&cards.id_from_link).map_err(|source| {
                BuildError::Pattern {
                    pattern: cards.id_from_link.clone(),
                    source,
                }
            })?,
            label: compile_all(&cards.label)?,
            secondary: compile_all(&cards.secondary)?,
            link: compile_all(&cards.link)?,
            media: compile_all(&cards.media)?,
            min_cards: config.min_cards.max(1),
        })
    }

    fn scrape_card(&self, card: ElementRef<'_>) -> Option<ScrapedCard> {
        let link = first_value(card, &self.link);
        let id = self
            .id_attributes
            .iter()
            .find_map(|attr| card.value().attr(attr))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| {
                link.as_deref()
                    .and_then(|href| self.id_from_link.captures(href))
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })?;
        let label = first_value(card, &self.label)?;

        Some(ScrapedCard {
            id,
            label,
            secondary: first_value(card, &self.secondary),
            link,
            media: first_value(card, &self.media),
        })
    }
}

impl Strategy for StructuralStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Structural
    }

    fn attempt(&self, content: &str) -> StrategyOutcome {
        let document = Html::parse_document(content);
        let mut containers_seen = 0usize;

        for container in &self.containers {
            let candidates: Vec<ElementRef<'_>> = document.select(container).collect();
            if candidates.is_empty() {
                continue;
            }
            containers_seen += candidates.len();

            let cards: Vec<ScrapedCard> = candidates
                .into_iter()
                .filter_map(|el| self.scrape_card(el))
                .collect();
            if cards.len() >= self.min_cards {
                return StrategyOutcome::Matched(RawPayload::Scraped(cards));
            }
        }

        if containers_seen == 0 {
            StrategyOutcome::NoMatch
        } else {
            StrategyOutcome::Malformed(format!(
                "{containers_seen} card container(s) found, fewer than {} with id and label",
                self.min_cards
            ))
        }
    }
}

/// First non-empty value among `selectors` inside `scope`.
fn first_value(scope: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .flat_map(|sel| scope.select(sel))
        .find_map(element_value)
}

/// Attribute-bearing elements yield their attribute; everything else its text.
fn element_value(el: ElementRef<'_>) -> Option<String> {
    let node = el.value();
    let raw = match node.name() {
        "meta" => node.attr("content").map(str::to_string),
        "a" | "link" => node.attr("href").map(str::to_string),
        "img" => node.attr("src").or_else(|| node.attr("data-src")).map(str::to_string),
        "source" => node
            .attr("srcset")
            .and_then(|set| set.split(',').next())
            .and_then(|first| first.split_whitespace().next())
            .map(str::to_string),
        _ => Some(el.text().collect::<Vec<_>>().join(" ")),
    }?;

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn compile_all(raws: &[String]) -> Result<Vec<Selector>, BuildError> {
    raws.iter().map(|raw| compile_selector(raw)).collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
