//! Command bodies shared by the one-shot subcommands and the REPL.

use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::{json, Value};

use harvest::{ExtractOutput, ExtractionRequest, Extractor, Target};

/// Most targets a single compare call accepts.
pub const MAX_COMPARE_TARGETS: usize = 5;

/// Options of one extract call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractArgs {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub refresh: bool,
    pub ignore_robots: bool,
    pub timeout_ms: Option<u64>,
}

/// Parse a `key=value` query parameter. The value may be empty.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

pub fn build_request(extractor: &Extractor, args: &ExtractArgs) -> anyhow::Result<ExtractionRequest> {
    let mut target =
        Target::parse(&args.url).with_context(|| format!("invalid target {}", args.url))?;
    for (key, value) in &args.params {
        target = target.with_param(key.clone(), value.clone());
    }

    let mut request = extractor
        .request(target)
        .respect_access_policy(!args.ignore_robots);
    if let Some(ms) = args.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }
    if args.refresh {
        request = request.force_refresh();
    }
    Ok(request)
}

/// Run one extraction. The flag is false when the extraction failed.
pub async fn extract(extractor: &Extractor, args: &ExtractArgs) -> anyhow::Result<(Value, bool)> {
    let request = build_request(extractor, args)?;
    let result = extractor.extract(&request).await;
    let ok = result.is_ok();
    Ok((serde_json::to_value(ExtractOutput::from(&result))?, ok))
}

/// Extract several targets side by side.
pub async fn compare(extractor: &Extractor, urls: &[String]) -> anyhow::Result<(Value, bool)> {
    if urls.is_empty() {
        bail!("compare needs at least one target");
    }
    if urls.len() > MAX_COMPARE_TARGETS {
        bail!(
            "compare accepts at most {MAX_COMPARE_TARGETS} targets, got {}",
            urls.len()
        );
    }

    let requests = urls
        .iter()
        .map(|url| {
            build_request(
                extractor,
                &ExtractArgs {
                    url: url.clone(),
                    ..ExtractArgs::default()
                },
            )
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let results = extractor.extract_many(&requests).await;
    let all_ok = results.iter().all(Result::is_ok);
    let entries = requests
        .iter()
        .zip(&results)
        .map(|(request, result)| {
            Ok(json!({
                "target": request.target.canonical(),
                "result": serde_json::to_value(ExtractOutput::from(result))?,
            }))
        })
        .collect::<anyhow::Result<Vec<Value>>>()?;
    Ok((Value::Array(entries), all_ok))
}

pub fn clear_cache(extractor: &Extractor) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(extractor.clear_cache())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest::HarvestConfig;

    fn extractor() -> Extractor {
        Extractor::from_config(HarvestConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("adults=2").unwrap(),
            ("adults".to_string(), "2".to_string())
        );
        assert_eq!(
            parse_param("checkin=").unwrap(),
            ("checkin".to_string(), String::new())
        );
        assert!(parse_param("=2").is_err());
        assert!(parse_param("adults").is_err());
    }

    #[test]
    fn test_build_request_applies_flags() {
        let args = ExtractArgs {
            url: "https://example.com/s/Lisbon/homes".into(),
            params: vec![("adults".into(), "2".into())],
            refresh: true,
            ignore_robots: true,
            timeout_ms: Some(1500),
        };
        let request = build_request(&extractor(), &args).unwrap();
        assert_eq!(
            request.target.canonical(),
            "https://example.com/s/Lisbon/homes?adults=2"
        );
        assert_eq!(request.options.timeout, Duration::from_millis(1500));
        assert!(!request.options.respect_access_policy);
        assert_eq!(request.cache, harvest::CacheControl::ForceRefresh);
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        let args = ExtractArgs {
            url: "not a url".into(),
            ..ExtractArgs::default()
        };
        assert!(build_request(&extractor(), &args).is_err());
    }

    #[tokio::test]
    async fn test_compare_limits_targets() {
        let urls: Vec<String> = (0..6)
            .map(|n| format!("https://example.com/rooms/{n}"))
            .collect();
        let err = compare(&extractor(), &urls).await.unwrap_err();
        assert!(err.to_string().contains("at most 5"));
    }

    #[test]
    fn test_clear_cache_output() {
        let value = clear_cache(&extractor()).unwrap();
        assert_eq!(value, json!({"cleared": true, "entries": 0}));
    }
}
