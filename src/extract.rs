use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::canonical::canonicalize;
use crate::http_client::build_client;
use crate::model::{ExtractedRow, Outcome};

/// Per-match counters above this are treated as a misread, not a score.
pub const MAX_COUNTER: u32 = 9_999;

/// Vision collaborator: scoreboard image in, best-effort player rows out.
/// Row count, order and name cleanliness are not guaranteed.
pub trait Extractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Vec<ExtractedRow>>;
}

/// Posts the image as base64 JSON to an extraction endpoint.
pub struct HttpExtractor {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpExtractor {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

impl Extractor for HttpExtractor {
    fn extract(&self, image: &[u8]) -> Result<Vec<ExtractedRow>> {
        let mime = infer::get(image)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream");
        let payload = json!({
            "image_base64": STANDARD.encode(image),
            "mime_type": mime,
        });

        let mut req = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }
        let resp = req.send().context("extraction request failed")?;
        let status = resp.status();
        let body = resp.text().context("failed reading extraction body")?;
        if !status.is_success() {
            return Err(anyhow!("extraction http {}: {}", status, truncate(&body, 200)));
        }
        parse_extraction_json(&body)
    }
}

/// Stand-in when no extraction endpoint is configured; every call fails.
pub struct UnconfiguredExtractor;

impl Extractor for UnconfiguredExtractor {
    fn extract(&self, _image: &[u8]) -> Result<Vec<ExtractedRow>> {
        Err(anyhow!("no extraction endpoint configured (set EXTRACTOR_URL)"))
    }
}

/// Parses an extraction response: a JSON array of rows, or `{"players": [...]}`,
/// optionally wrapped in a Markdown code fence.
pub fn parse_extraction_json(raw: &str) -> Result<Vec<ExtractedRow>> {
    let trimmed = strip_code_fence(raw.trim());
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(trimmed).context("invalid extraction json")?;
    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(obj) => obj
            .get("players")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("extraction object has no players array"))?,
        _ => return Err(anyhow!("unexpected extraction payload")),
    };

    rows.iter()
        .enumerate()
        .map(|(idx, row)| parse_row(row).with_context(|| format!("row {idx}")))
        .collect()
}

fn parse_row(row: &Value) -> Result<ExtractedRow> {
    let name = row
        .get("player_name")
        .or_else(|| row.get("name"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("missing player name"))?;
    if canonicalize(name).is_empty() {
        return Err(anyhow!("player name {name:?} has no letters or digits"));
    }
    let result = row
        .get("result")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing result"))?
        .parse::<Outcome>()
        .map_err(|msg| anyhow!(msg))?;
    Ok(ExtractedRow {
        name: name.to_string(),
        result,
        kills: counter(row, "kills")?,
        deaths: counter(row, "deaths")?,
        assists: counter(row, "assists")?,
    })
}

/// Missing or garbled counters read as zero and negatives clamp to zero.
/// Anything above [`MAX_COUNTER`] fails the row.
fn counter(row: &Value, key: &str) -> Result<u32> {
    let raw = match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let value = raw.unwrap_or(0).max(0);
    if value > i64::from(MAX_COUNTER) {
        return Err(anyhow!("implausible {key} value {value}"));
    }
    Ok(value as u32)
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_code_fence("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("[2]"), "[2]");
    }

    #[test]
    fn counters_tolerate_garbage() {
        let row = json!({"kills": "7", "deaths": -3, "assists": "lots"});
        assert_eq!(counter(&row, "kills").unwrap(), 7);
        assert_eq!(counter(&row, "deaths").unwrap(), 0);
        assert_eq!(counter(&row, "assists").unwrap(), 0);
        assert_eq!(counter(&row, "missing").unwrap(), 0);
    }

    #[test]
    fn oversized_counters_fail_the_row() {
        let row = json!({"kills": 99_999_999_999_i64, "deaths": 0});
        let err = counter(&row, "kills").unwrap_err();
        assert!(err.to_string().contains("implausible kills"));
        assert_eq!(counter(&json!({"kills": 9_999}), "kills").unwrap(), MAX_COUNTER);
    }

    #[test]
    fn symbol_only_names_are_rejected() {
        let err = parse_extraction_json(r#"[{"name": "★★★", "result": "WIN"}]"#).unwrap_err();
        assert!(format!("{err:#}").contains("no letters or digits"));
    }

    #[test]
    fn unconfigured_extractor_always_fails() {
        assert!(UnconfiguredExtractor.extract(b"anything").is_err());
    }
}
