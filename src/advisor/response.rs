use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::settings::units::{format_aperture, format_shutter, parse_aperture, parse_iso, parse_shutter};

/// A fully validated, canonicalized LLM answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub iso: u32,
    /// Canonical `f/<n>`.
    pub aperture: String,
    /// Canonical `1/<n>s` or `<n>s`.
    pub shutter_speed: String,
    pub explanation: String,
}

/// Parse raw LLM response text into [`LlmSettings`].
///
/// Handles common LLM quirks (markdown code fences, leading prose, trailing
/// commas, unquoted string values). Validation is all-or-nothing: if any of
/// the four fields is missing or malformed the whole response is rejected.
pub fn parse_llm_settings(text: &str) -> Result<LlmSettings> {
    log::debug!("Raw LLM response:\n{text}");

    let cleaned = text.trim();
    if cleaned.is_empty() {
        anyhow::bail!("LLM returned an empty response");
    }

    for candidate in json_candidates(cleaned) {
        if let Some(obj) = parse_object(&candidate) {
            return validate_settings(&obj);
        }
        if let Some(obj) = parse_object(&strip_trailing_commas(&candidate)) {
            return validate_settings(&obj);
        }
    }

    anyhow::bail!("Could not find a JSON object in the LLM response")
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Check and canonicalize the four required fields.
pub fn validate_settings(obj: &Map<String, Value>) -> Result<LlmSettings> {
    let iso = obj
        .get("iso")
        .and_then(value_to_iso)
        .context("LLM response has no valid `iso`")?;

    let f_number = obj
        .get("aperture")
        .and_then(|v| value_to_positive(v, parse_aperture))
        .context("LLM response has no valid `aperture`")?;

    let shutter_speed = obj
        .get("shutter_speed")
        .and_then(|v| value_to_positive(v, parse_shutter))
        .and_then(format_shutter)
        .context("LLM response has no valid `shutter_speed`")?;

    let explanation = obj
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .context("LLM response has no `explanation`")?;

    Ok(LlmSettings {
        iso,
        aperture: format_aperture(f_number),
        shutter_speed,
        explanation: explanation.to_string(),
    })
}

fn value_to_iso(val: &Value) -> Option<u32> {
    match val {
        Value::Number(n) => {
            let f = n.as_f64()?;
            (f > 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64).then_some(f as u32)
        }
        Value::String(s) => parse_iso(s),
        _ => None,
    }
}

fn value_to_positive(val: &Value, parse: fn(&str) -> Option<f64>) -> Option<f64> {
    match val {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite() && *f > 0.0),
        Value::String(s) => parse(s),
        _ => None,
    }
}

/// Texts worth handing to `serde_json`, most specific first: a fenced
/// block, the outermost braces (raw and with bare values quoted), then the
/// whole reply.
fn json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    candidates.extend(fenced_block(text));

    if let Some(braced) = outer_braces(text) {
        let quoted = quote_bare_values(braced);
        candidates.push(braced.to_string());
        if quoted != braced {
            candidates.push(quoted);
        }
    }

    candidates.push(text.to_string());
    candidates
}

/// Body of the first ```` ``` ```` fence; the opening line (and any language
/// tag on it) is dropped.
fn fenced_block(text: &str) -> Option<String> {
    let is_fence = |line: &&str| line.trim_start().starts_with("```");
    let mut lines = text.lines().skip_while(|l| !is_fence(l));
    lines.next()?;
    let body = lines.take_while(|l| !is_fence(l)).collect::<Vec<_>>().join("\n");
    (!body.trim().is_empty()).then_some(body)
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Whether a scan position is inside a JSON string literal.
#[derive(Default)]
struct StringState {
    in_string: bool,
    escaped: bool,
}

impl StringState {
    /// Advance over `c`. True when `c` is part of a string literal,
    /// delimiting quotes included.
    fn step(&mut self, c: char) -> bool {
        if self.in_string {
            match (self.escaped, c) {
                (true, _) => self.escaped = false,
                (false, '\\') => self.escaped = true,
                (false, '"') => self.in_string = false,
                _ => {}
            }
            return true;
        }
        self.in_string = c == '"';
        self.in_string
    }
}

/// Quote bare values after a colon, as in `"aperture": f/2.8,`. Numbers and
/// `null`/`true`/`false` stay bare.
fn quote_bare_values(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut state = StringState::default();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let quoted = state.step(c);
        out.push(c);
        if quoted || c != ':' {
            continue;
        }

        while let Some(ws) = chars.next_if(|ch| matches!(ch, ' ' | '\t')) {
            out.push(ws);
        }
        if chars.peek().is_none_or(|ch| matches!(ch, '"' | '{' | '[' | '\n')) {
            continue;
        }

        let mut value = String::new();
        while let Some(vc) = chars.next_if(|ch| !matches!(ch, ',' | '}' | '\n')) {
            value.push(vc);
        }
        let value = value.trim_end();
        if matches!(value, "null" | "true" | "false") || value.parse::<f64>().is_ok() {
            out.push_str(value);
        } else {
            out.push('"');
            out.push_str(&value.replace('"', "\\\""));
            out.push('"');
        }
    }

    out
}

/// Drop commas that directly precede `}` or `]`.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut state = StringState::default();
    let mut out = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        if !state.step(c) && c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
