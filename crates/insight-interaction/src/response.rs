//! Tolerant parsing of language-model output.
//!
//! Models wrap JSON in markdown fences, prepend commentary, leave trailing
//! commas or emit raw newlines inside strings. Parsing tries the cleaned text
//! first and a repaired variant second.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("static regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?[ \t]*```\s*$").expect("static regex"));
static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").expect("static regex")
});
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("static regex"));

/// Removes one surrounding markdown code fence, whatever its language tag.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let start = LEADING_FENCE.find(trimmed).map_or(0, |m| m.end());
    let body = &trimmed[start..];
    let end = TRAILING_FENCE.find(body).map_or(body.len(), |m| m.start());
    body[..end].trim()
}

/// The outermost `{ ... }` span of `text`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parses model output into `T`, repairing common formatting slips.
pub fn parse_llm_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let cleaned = strip_code_fences(raw);
    let candidate = extract_json_object(cleaned).unwrap_or(cleaned);

    let first_error = match serde_json::from_str::<T>(candidate) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let repaired = repair_json(candidate);
    serde_json::from_str::<T>(&repaired).map_err(|_| {
        let preview: String = raw.chars().take(300).collect();
        format!("could not parse model output as JSON ({first_error}); raw: {preview}")
    })
}

fn repair_json(text: &str) -> String {
    let flattened = text.replace("\r\n", " ").replace(['\r', '\n'], " ");
    let without_controls = CONTROL_CHARS.replace_all(&flattened, " ");
    TRAILING_COMMA
        .replace_all(&without_controls, "$1")
        .into_owned()
}
