//! Raw payload to canonical [`Record`]s.
//!
//! Unknown fields are dropped. Optional fields missing from the payload come
//! out as `None`; a field that is present but empty stays `Some("")`.

use std::collections::HashSet;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde_json::Value;
use tracing::warn;

use crate::strategy::schema::first_scalar;
use crate::strategy::{EmbedSchema, IdEncoding, RawPayload, ScrapedCard};
use crate::types::{Record, Target};

/// Records plus bookkeeping for the empty-result check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub records: Vec<Record>,
    /// Items excluded because their id could not be decoded.
    pub dropped: usize,
    /// Items the strategy handed over, duplicates included.
    pub seen: usize,
}

/// Normalize a matched payload. Duplicate ids keep the first occurrence.
pub fn normalize(payload: &RawPayload, target: &Target) -> Normalized {
    let mut out = Normalized {
        seen: payload.len(),
        ..Normalized::default()
    };
    let mut ids = HashSet::new();

    let candidates: Vec<Option<Record>> = match payload {
        RawPayload::Embedded { schema, items } => items
            .iter()
            .map(|item| embedded_record(schema, item, target))
            .collect(),
        RawPayload::Scraped(cards) => cards
            .iter()
            .map(|card| scraped_record(card, target))
            .collect(),
    };

    for candidate in candidates {
        match candidate {
            Some(record) => {
                if ids.insert(record.id.clone()) {
                    out.records.push(record);
                }
            }
            None => out.dropped += 1,
        }
    }
    out
}

fn embedded_record(schema: &EmbedSchema, item: &Value, target: &Target) -> Option<Record> {
    let raw_id = first_scalar(&schema.id, item)?;
    let id = match schema.id_encoding {
        IdEncoding::Plain => raw_id,
        IdEncoding::Base64Composite => match decode_composite_id(&raw_id) {
            Some(id) => id,
            None => {
                warn!(schema = %schema.name, raw_id = %raw_id, "undecodable id, record dropped");
                return None;
            }
        },
    };
    let label = first_scalar(&schema.label, item)?;

    let link = first_scalar(&schema.link, item)
        .map(|href| absolutize(target, href))
        .or_else(|| {
            schema.link_template.as_ref().map(|template| {
                template
                    .replace("{origin}", &target.origin())
                    .replace("{id}", &id)
            })
        });

    Some(Record {
        id,
        label,
        secondary_text: first_scalar(&schema.secondary, item),
        link,
        media_ref: first_scalar(&schema.media, item).map(|src| absolutize(target, src)),
    })
}

fn scraped_record(card: &ScrapedCard, target: &Target) -> Option<Record> {
    Some(Record {
        id: card.id.clone(),
        label: card.label.clone(),
        secondary_text: card.secondary.clone(),
        link: card.link.clone().map(|href| absolutize(target, href)),
        media_ref: card.media.clone().map(|src| absolutize(target, src)),
    })
}

/// Decode a base64 `Type:123` identifier to `123`.
///
/// Purely numeric ids are taken as already decoded.
pub fn decode_composite_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return Some(raw.to_string());
    }

    let bytes = STANDARD
        .decode(raw)
        .or_else(|_| URL_SAFE.decode(raw))
        .ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (_, tail) = text.rsplit_once(':')?;
    let tail = tail.trim();
    (!tail.is_empty()).then(|| tail.to_string())
}

fn absolutize(target: &Target, reference: String) -> String {
    if reference.is_empty() {
        return reference;
    }
    target.resolve(&reference).unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> Target {
        Target::parse("https://example.com/s/Lisbon/homes?adults=2").unwrap()
    }

    fn embedded(schema: EmbedSchema, items: Vec<Value>) -> RawPayload {
        RawPayload::Embedded { schema, items }
    }

    #[test]
    fn test_decode_composite_id() {
        assert_eq!(
            decode_composite_id("RGVtYW5kU3RheUxpc3Rpbmc6MTIz").as_deref(),
            Some("123")
        );
        assert_eq!(decode_composite_id("98765").as_deref(), Some("98765"));
        assert_eq!(decode_composite_id("!!not base64!!"), None);
        // "plain" has no separator
        assert_eq!(decode_composite_id("cGxhaW4="), None);
    }

    #[test]
    fn test_embedded_record_with_template_link() {
        let payload = embedded(
            EmbedSchema::stays_search(),
            vec![json!({
                "demandStayListing": {"id": "RGVtYW5kU3RheUxpc3Rpbmc6MTIz"},
                "title": "Sea view loft",
                "structuredDisplayPrice": {"primaryLine": {"accessibilityLabel": "€95 per night"}},
                "contextualPictures": [{"picture": "https://img.example.com/a.jpg"}],
                "unrelated": {"deep": true}
            })],
        );
        let out = normalize(&payload, &target());
        assert_eq!(out.dropped, 0);
        assert_eq!(
            out.records,
            vec![Record {
                id: "123".into(),
                label: "Sea view loft".into(),
                secondary_text: Some("€95 per night".into()),
                link: Some("https://example.com/rooms/123".into()),
                media_ref: Some("https://img.example.com/a.jpg".into()),
            }]
        );
    }

    #[test]
    fn test_bad_id_drops_only_that_record() {
        let payload = embedded(
            EmbedSchema::stays_search(),
            vec![
                json!({"demandStayListing": {"id": "%%%"}, "title": "Broken"}),
                json!({"demandStayListing": {"id": "U3RheUxpc3Rpbmc6Nzc="}, "title": "Barn"}),
            ],
        );
        let out = normalize(&payload, &target());
        assert_eq!(out.seen, 2);
        assert_eq!(out.dropped, 1);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].id, "77");
    }

    #[test]
    fn test_empty_string_kept_missing_is_none() {
        let payload = embedded(
            EmbedSchema::stays_search_legacy(),
            vec![json!({"listing": {"id": 5, "name": "Hut", "priceFormatted": ""}})],
        );
        let out = normalize(&payload, &target());
        assert_eq!(out.records[0].secondary_text.as_deref(), Some(""));
        assert!(out.records[0].media_ref.is_none());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let payload = embedded(
            EmbedSchema::stays_search_legacy(),
            vec![
                json!({"listing": {"id": 5, "name": "First"}}),
                json!({"listing": {"id": 5, "name": "Second"}}),
            ],
        );
        let out = normalize(&payload, &target());
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].label, "First");
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn test_scraped_relative_links_resolved() {
        let payload = RawPayload::Scraped(vec![ScrapedCard {
            id: "55".into(),
            label: "Yurt".into(),
            secondary: None,
            link: Some("/rooms/55".into()),
            media: Some("//img.example.com/55.jpg".into()),
        }]);
        let out = normalize(&payload, &target());
        assert_eq!(
            out.records[0].link.as_deref(),
            Some("https://example.com/rooms/55")
        );
        assert_eq!(
            out.records[0].media_ref.as_deref(),
            Some("https://img.example.com/55.jpg")
        );
    }
}
