//! Typed extraction of JSON payloads from free-form model output.
//!
//! Callers pick an ordered chain of [`JsonSource`] strategies; the first one
//! that both locates a candidate and deserializes into the target type wins.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

/// Where to look for JSON inside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonSource {
    /// Body of the first ```` ```json ```` block.
    FencedJson,
    /// Body of the first fenced block of any language.
    AnyFence,
    /// From the first `{` to the last `}`.
    ObjectSpan,
    /// The first `[ "..." ... ]` shaped substring.
    ArraySpan,
    /// The whole trimmed text.
    Whole,
}

impl JsonSource {
    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        let candidate = match self {
            JsonSource::FencedJson => fenced_body(text, "```json"),
            JsonSource::AnyFence => fenced_body(text, "```").map(drop_tag_line),
            JsonSource::ObjectSpan => {
                let start = text.find('{')?;
                let end = text.rfind('}')?;
                (end > start).then(|| &text[start..=end])
            }
            JsonSource::ArraySpan => array_pattern().find(text).map(|m| m.as_str()),
            JsonSource::Whole => Some(text),
        };
        candidate.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Chains for the three response shapes the pipeline parses.
pub const ANALYSIS_CHAIN: &[JsonSource] = &[JsonSource::ObjectSpan];
pub const PATH_LIST_CHAIN: &[JsonSource] = &[
    JsonSource::FencedJson,
    JsonSource::AnyFence,
    JsonSource::ArraySpan,
];
pub const RECORD_CHAIN: &[JsonSource] = &[
    JsonSource::FencedJson,
    JsonSource::AnyFence,
    JsonSource::Whole,
];

/// Deserialize the first candidate in `chain` that parses as `T`.
pub fn parse_with<T: DeserializeOwned>(text: &str, chain: &[JsonSource]) -> Option<T> {
    chain.iter().find_map(|source| {
        let candidate = source.extract(text)?;
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(source = ?source, error = %e, "candidate did not parse");
                None
            }
        }
    })
}

fn fenced_body<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

fn drop_tag_line(body: &str) -> &str {
    match body.split_once('\n') {
        Some((tag, rest)) if is_tag(tag) => rest,
        _ => body,
    }
}

fn is_tag(line: &str) -> bool {
    let tag = line.trim();
    !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn array_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"(?s)\[\s*".*?\]"#).expect("array pattern must compile"))
}
