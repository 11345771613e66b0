use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The decision object the model is asked to produce each cycle.
///
/// `action == None` is a well-formed "do nothing" decision and must be kept
/// distinct from a parse failure: the former is a quiet no-op, the latter is
/// fed back to the model so it can correct its format.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Decision {
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionParseError {
    /// No candidate span of the response parsed as a decision object.
    NoJsonFound,
}

impl std::fmt::Display for DecisionParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionParseError::NoJsonFound => {
                write!(f, "no decision JSON found in model response")
            }
        }
    }
}

impl std::error::Error for DecisionParseError {}

/// Extracts the body of the first fenced code block, optionally requiring a
/// language tag. `tag` of `""` matches only untagged fences.
fn extract_fenced(text: &str, tag: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find("```") {
        let start = search_from + rel + 3;
        let rest = &text[start..];
        let line_end = rest.find('\n')?;
        let fence_tag = rest[..line_end].trim();
        let body_start = start + line_end + 1;
        let body = &text[body_start..];
        let end = body.find("```")?;
        if fence_tag.eq_ignore_ascii_case(tag) {
            return Some(body[..end].trim().to_string());
        }
        search_from = body_start + end + 3;
    }
    None
}

/// Greedy brace span: first `{` through last `}`. Models that wrap the JSON
/// in prose almost always leave the object intact in between.
fn extract_brace_span(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

fn try_decode(candidate: &str) -> Option<Decision> {
    serde_json::from_str::<Decision>(candidate).ok()
}

/// Parses a raw model response into a [`Decision`].
///
/// Candidates are tried in order, first success wins:
/// 1. the whole text;
/// 2. a ```json fenced block;
/// 3. an untagged fenced block;
/// 4. the greedy first-`{`..last-`}` span.
///
/// The ordering is a deliberate lenience policy: models frequently wrap the
/// JSON in prose or code fences, and a wrapped-but-valid decision should
/// never be rejected.
pub fn parse_decision(raw: &str) -> Result<Decision, DecisionParseError> {
    if let Some(d) = try_decode(raw.trim()) {
        return Ok(d);
    }
    if let Some(body) = extract_fenced(raw, "json")
        && let Some(d) = try_decode(&body)
    {
        return Ok(d);
    }
    if let Some(body) = extract_fenced(raw, "")
        && let Some(d) = try_decode(&body)
    {
        return Ok(d);
    }
    if let Some(span) = extract_brace_span(raw)
        && let Some(d) = try_decode(&span)
    {
        return Ok(d);
    }
    Err(DecisionParseError::NoJsonFound)
}
