//! Versioned field-path projection over loosely shaped embedded JSON.
//!
//! A schema names the array holding the records and, for every canonical
//! field, an ordered list of alternative paths. Projection fails closed: an
//! item that lacks an identifier or a label makes the whole schema reject the
//! payload instead of yielding a partial record set.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RawPayload, StrategyOutcome};

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    /// Array index; also accepted as an object key.
    Index(usize),
    /// Fan out over every element of an array.
    Each,
}

/// Dotted path such as `niobeClientData.0.1.data` or `sections.*.items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Err("empty field path".to_string());
        }
        let segments = raw
            .split('.')
            .map(|part| match part {
                "" => Err(format!("empty segment in field path {raw:?}")),
                "*" => Ok(Segment::Each),
                p if p.bytes().all(|b| b.is_ascii_digit()) => p
                    .parse()
                    .map(Segment::Index)
                    .map_err(|e| format!("bad index {p:?} in {raw:?}: {e}")),
                p => Ok(Segment::Key(p.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Every value the path reaches, or `None` when the path is absent.
    ///
    /// `null` counts as absent. A `*` over an empty array still resolves,
    /// to an empty set.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<Vec<&'a Value>> {
        let mut frontier = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            let mut reached = false;
            for value in &frontier {
                match (segment, value) {
                    (Segment::Each, Value::Array(items)) => {
                        reached = true;
                        next.extend(items.iter().filter(|v| !v.is_null()));
                    }
                    (Segment::Each, _) => {}
                    (Segment::Key(key), Value::Object(map)) => {
                        if let Some(child) = map.get(key).filter(|v| !v.is_null()) {
                            reached = true;
                            next.push(child);
                        }
                    }
                    (Segment::Index(idx), Value::Array(items)) => {
                        if let Some(child) = items.get(*idx).filter(|v| !v.is_null()) {
                            reached = true;
                            next.push(child);
                        }
                    }
                    (Segment::Index(idx), Value::Object(map)) => {
                        if let Some(child) = map.get(&idx.to_string()).filter(|v| !v.is_null()) {
                            reached = true;
                            next.push(child);
                        }
                    }
                    _ => {}
                }
            }
            if !frontier.is_empty() && !reached {
                return None;
            }
            frontier = next;
        }
        Some(frontier)
    }

    /// First value the path reaches.
    pub fn first<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.resolve(root).and_then(|values| values.into_iter().next())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

/// How identifiers are encoded in the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdEncoding {
    #[default]
    Plain,
    /// base64 of `Type:123`; the part after the last `:` is the id.
    Base64Composite,
}

/// Where records live in an embedded payload and how to read their fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedSchema {
    pub name: String,
    pub version: u32,
    pub records_path: FieldPath,
    /// Items lacking this path are skipped rather than rejected.
    #[serde(default)]
    pub item_filter: Option<FieldPath>,
    pub id: Vec<FieldPath>,
    pub label: Vec<FieldPath>,
    #[serde(default)]
    pub secondary: Vec<FieldPath>,
    #[serde(default)]
    pub link: Vec<FieldPath>,
    #[serde(default)]
    pub media: Vec<FieldPath>,
    #[serde(default)]
    pub id_encoding: IdEncoding,
    /// Fallback link, with `{origin}` and `{id}` placeholders.
    #[serde(default)]
    pub link_template: Option<String>,
}

impl EmbedSchema {
    /// Items under `records_path` that this schema accepts.
    ///
    /// `Ok(None)` when the path is absent, `Err` when it is present but an
    /// item misses a required field.
    pub fn project(&self, root: &Value) -> Result<Option<Vec<Value>>, String> {
        let Some(resolved) = self.records_path.resolve(root) else {
            return Ok(None);
        };

        let mut items = Vec::new();
        for value in resolved {
            match value {
                Value::Array(entries) => items.extend(entries.iter()),
                _ => {
                    return Err(format!(
                        "{} v{}: {} is not an array",
                        self.name, self.version, self.records_path
                    ))
                }
            }
        }

        let mut accepted = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            if let Some(filter) = &self.item_filter {
                if filter.first(item).is_none() {
                    continue;
                }
            }
            if first_scalar(&self.id, item).is_none() {
                return Err(format!(
                    "{} v{}: item {idx} has no identifier",
                    self.name, self.version
                ));
            }
            if first_scalar(&self.label, item).is_none() {
                return Err(format!(
                    "{} v{}: item {idx} has no label",
                    self.name, self.version
                ));
            }
            accepted.push(item.clone());
        }
        Ok(Some(accepted))
    }

    /// Search results embedded in the deferred-state payload.
    pub fn stays_search() -> Self {
        Self {
            name: "stays_search".to_string(),
            version: 2,
            records_path: path("niobeClientData.0.1.data.presentation.staysSearch.results.searchResults"),
            item_filter: None,
            id: paths(&["demandStayListing.id", "listing.id"]),
            label: paths(&[
                "title",
                "nameLocalized.localizedStringWithTranslationPreference",
                "demandStayListing.description.name.localizedStringWithTranslationPreference",
                "listing.name",
            ]),
            secondary: paths(&[
                "structuredDisplayPrice.primaryLine.accessibilityLabel",
                "structuredDisplayPrice.primaryLine.discountedPrice",
                "structuredDisplayPrice.primaryLine.price",
                "listing.priceFormatted",
            ]),
            link: Vec::new(),
            media: paths(&["contextualPictures.0.picture", "listing.contextualPictures.0.picture"]),
            id_encoding: IdEncoding::Base64Composite,
            link_template: Some("{origin}/rooms/{id}".to_string()),
        }
    }

    /// Older `__NEXT_DATA__` layout with results grouped into sections.
    pub fn stays_search_legacy() -> Self {
        Self {
            name: "stays_search_legacy".to_string(),
            version: 1,
            records_path: path("props.pageProps.searchResults.sections.*.items"),
            item_filter: Some(path("listing")),
            id: paths(&["listing.id"]),
            label: paths(&["listing.name"]),
            secondary: paths(&["listing.priceFormatted", "listing.city"]),
            link: Vec::new(),
            media: paths(&["listing.contextualPictures.0.picture"]),
            id_encoding: IdEncoding::Plain,
            link_template: Some("{origin}/rooms/{id}".to_string()),
        }
    }

    /// Detail page sections; one record per section.
    pub fn listing_sections() -> Self {
        Self {
            name: "listing_sections".to_string(),
            version: 2,
            records_path: path(
                "niobeClientData.0.1.data.presentation.stayProductDetailPage.sections.sections",
            ),
            item_filter: Some(path("sectionId")),
            id: paths(&["sectionId"]),
            label: paths(&["section.title", "sectionId"]),
            secondary: paths(&[
                "section.subtitle",
                "section.htmlDescription.htmlText",
                "section.description",
            ]),
            link: Vec::new(),
            media: paths(&["section.previewImages.0.baseUrl"]),
            id_encoding: IdEncoding::Plain,
            link_template: None,
        }
    }

    pub fn listing_sections_legacy() -> Self {
        Self {
            name: "listing_sections_legacy".to_string(),
            version: 1,
            records_path: path(
                "props.pageProps.pdpRequest.data.presentation.stayProductDetailPage.sections.sections",
            ),
            ..Self::listing_sections()
        }
    }

    /// Built-in schemas, newest layouts first.
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::stays_search(),
            Self::listing_sections(),
            Self::stays_search_legacy(),
            Self::listing_sections_legacy(),
        ]
    }
}

/// Try each schema in order against a parsed payload.
///
/// Never returns `NoMatch`: the caller already found a payload, so failing
/// every schema is reported as malformed.
pub(crate) fn project_payload(schemas: &[EmbedSchema], root: &Value, allow_empty: bool) -> StrategyOutcome {
    let mut notes = Vec::new();
    for schema in schemas {
        match schema.project(root) {
            Ok(Some(items)) if items.is_empty() && !allow_empty => {
                notes.push(format!("{} v{}: no records", schema.name, schema.version));
            }
            Ok(Some(items)) => {
                return StrategyOutcome::Matched(RawPayload::Embedded {
                    schema: schema.clone(),
                    items,
                })
            }
            Ok(None) => {}
            Err(reason) => notes.push(reason),
        }
    }
    if notes.is_empty() {
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        StrategyOutcome::Malformed(format!("payload matches no known schema (tried {})", names.join(", ")))
    } else {
        StrategyOutcome::Malformed(notes.join("; "))
    }
}

/// First alternative that resolves to a string, number or boolean.
///
/// Blank strings count as absent.
pub(crate) fn first_scalar(alternatives: &[FieldPath], item: &Value) -> Option<String> {
    alternatives
        .iter()
        .filter_map(|p| p.first(item))
        .filter_map(scalar_text)
        .find(|text| !text.trim().is_empty())
}

pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn path(raw: &str) -> FieldPath {
    FieldPath::parse(raw).unwrap_or_else(|_| FieldPath {
        raw: raw.to_string(),
        segments: vec![Segment::Key(raw.to_string())],
    })
}

fn paths(raws: &[&str]) -> Vec<FieldPath> {
    raws.iter().map(|raw| path(raw)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_segments() {
        let p = FieldPath::parse("a.0.*.b").unwrap();
        assert_eq!(
            p.segments,
            vec![
                Segment::Key("a".into()),
                Segment::Index(0),
                Segment::Each,
                Segment::Key("b".into())
            ]
        );
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("").is_err());
    }

    #[test]
    fn test_resolve_index_and_wildcard() {
        let v = json!({"outer": [[0, {"sections": [{"items": [1, 2]}, {"items": [3]}]}]]});
        let p = FieldPath::parse("outer.0.1.sections.*.items").unwrap();
        let found = p.resolve(&v).unwrap();
        assert_eq!(found, vec![&json!([1, 2]), &json!([3])]);
    }

    #[test]
    fn test_null_and_missing_are_absent() {
        let v = json!({"a": null, "b": {"c": 1}});
        assert!(FieldPath::parse("a").unwrap().resolve(&v).is_none());
        assert!(FieldPath::parse("b.d").unwrap().resolve(&v).is_none());
        assert_eq!(FieldPath::parse("b.c").unwrap().first(&v), Some(&json!(1)));
    }

    #[test]
    fn test_wildcard_over_empty_array_resolves_empty() {
        let v = json!({"sections": []});
        let found = FieldPath::parse("sections.*.items").unwrap().resolve(&v);
        assert_eq!(found, Some(vec![]));
    }

    #[test]
    fn test_schema_rejects_item_without_label() {
        let schema = EmbedSchema::stays_search_legacy();
        let v = json!({"props": {"pageProps": {"searchResults": {"sections": [
            {"items": [{"listing": {"id": 1, "name": "Loft"}}, {"listing": {"id": 2}}]}
        ]}}}});
        let err = schema.project(&v).unwrap_err();
        assert!(err.contains("item 1 has no label"));
    }

    #[test]
    fn test_blank_identifier_or_label_is_rejected() {
        let schema = EmbedSchema::stays_search_legacy();
        let blank_id = json!({"props": {"pageProps": {"searchResults": {"sections": [
            {"items": [{"listing": {"id": "", "name": "Loft"}}]}
        ]}}}});
        assert!(schema.project(&blank_id).unwrap_err().contains("item 0 has no identifier"));

        let blank_label = json!({"props": {"pageProps": {"searchResults": {"sections": [
            {"items": [{"listing": {"id": 7, "name": "   "}}]}
        ]}}}});
        assert!(schema.project(&blank_label).unwrap_err().contains("item 0 has no label"));
    }

    #[test]
    fn test_item_filter_skips_non_listing_items() {
        let schema = EmbedSchema::stays_search_legacy();
        let v = json!({"props": {"pageProps": {"searchResults": {"sections": [
            {"items": [{"ad": true}, {"listing": {"id": 9, "name": "Cabin"}}]}
        ]}}}});
        let items = schema.project(&v).unwrap().unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_schema_round_trips_through_serde() {
        let schema = EmbedSchema::stays_search();
        let json = serde_json::to_string(&schema).unwrap();
        let back: EmbedSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_project_payload_reports_unknown_shape() {
        let outcome = project_payload(&EmbedSchema::builtin(), &json!({"other": 1}), true);
        match outcome {
            StrategyOutcome::Malformed(msg) => assert!(msg.contains("no known schema")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }
}
