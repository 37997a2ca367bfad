//! Tolerant judge-response parsing pipeline (spec.md §4.5).
//!
//! Judge models rarely return clean JSON under load: they truncate mid-string, use a
//! similarity-score synonym, or wrap the reason in a field the schema hint didn't ask for. This
//! module runs a fixed, ordered pipeline and takes the first stage that succeeds rather than
//! mixing strategies, per the spec's explicit "must be a single well-ordered sequence" rule.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Result of the tolerant pipeline: a score (pre-normalization) and a possibly-empty reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJudgment {
    pub score: f64,
    pub reason: String,
}

/// Runs stages 1-4 of spec.md §4.5 in order, returning the first value found for each field.
/// Score and reason are resolved independently: a response can yield a score via JSON parsing
/// but a reason via regex fallback if the JSON's reason field was itself truncated away.
pub fn parse_judge_response(body: &str) -> Option<ParsedJudgment> {
    let value = serde_json::from_str::<Value>(body)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&repair_truncation(body)).ok());

    let score = value
        .as_ref()
        .and_then(extract_score_field)
        .or_else(|| extract_score_regex(body));

    let reason = value
        .as_ref()
        .and_then(extract_reason_field)
        .or_else(|| extract_reason_regex(body));

    let score = score?;
    let reason = reason.unwrap_or_default();
    Some(ParsedJudgment { score, reason })
}

/// Normalizes a raw score to the persisted `[1, 100]` integer range (spec.md §4.5 step 5):
/// values `<= 1.0` are treated as a `0..1` fraction and scaled up; everything is then clamped,
/// with non-positive values floored to `1` rather than `0`.
pub fn normalize_score(raw: f64) -> i32 {
    let scaled = if raw <= 1.0 { raw * 100.0 } else { raw };
    let clamped = scaled.round().clamp(1.0, 100.0);
    clamped as i32
}

/// Stage 1 (object case-insensitive lookup): `score`/`similarity`, read as any JSON number.
fn extract_score_field(value: &Value) -> Option<f64> {
    let obj = value.as_object()?;
    for key in ["score", "similarity"] {
        if let Some(found) = find_key_case_insensitive(obj, key) {
            if let Some(n) = found.as_f64() {
                return Some(n);
            }
            if let Some(s) = found.as_str() {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

/// Stage 1 reason lookup: `reason`/`response`/`explanation`.
fn extract_reason_field(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    for key in ["reason", "response", "explanation"] {
        if let Some(found) = find_key_case_insensitive(obj, key) {
            if let Some(s) = found.as_str() {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn find_key_case_insensitive<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Option<&'a Value> {
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Stage 2: truncation repair. Scans tracking string/escape state and bracket nesting, then
/// appends whatever closers are missing so the result re-parses as JSON. This is lossy by
/// design — it recovers structure, not the content that was cut off.
pub fn repair_truncation(body: &str) -> String {
    let mut in_string = false;
    let mut escaped = false;
    let mut stack: Vec<char> = Vec::new();

    for ch in body.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut repaired = body.to_string();
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Stage 3: `(score|similarity)\s*:\s*(\d+(\.\d+)?)`, case-insensitive.
fn extract_score_regex(body: &str) -> Option<f64> {
    static SCORE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SCORE_RE.get_or_init(|| {
        Regex::new(r"(?i)(score|similarity)\s*:\s*(\d+(?:\.\d+)?)").expect("valid regex")
    });
    re.captures(body)
        .and_then(|c| c.get(2))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Stage 4: four reason patterns in order of specificity (spec.md §4.5 step 4).
fn extract_reason_regex(body: &str) -> Option<String> {
    static ESCAPED_STRING: OnceLock<Regex> = OnceLock::new();
    static LENIENT_QUOTES: OnceLock<Regex> = OnceLock::new();
    static KEY_COLON_QUOTE: OnceLock<Regex> = OnceLock::new();
    static TRUNCATED_TRAILING: OnceLock<Regex> = OnceLock::new();

    let escaped_string = ESCAPED_STRING.get_or_init(|| {
        Regex::new(r#"(?is)"(?:reason|response|explanation)"\s*:\s*"((?:[^"\\]|\\.)*)""#)
            .expect("valid regex")
    });
    let lenient_quotes = LENIENT_QUOTES.get_or_init(|| {
        Regex::new(r#"(?is)['"](?:reason|response|explanation)['"]\s*:\s*['"](.*?)['"]"#)
            .expect("valid regex")
    });
    let key_colon_quote = KEY_COLON_QUOTE.get_or_init(|| {
        Regex::new(r#"(?is)(?:reason|response|explanation)\s*:\s*"(.*)"#).expect("valid regex")
    });
    let truncated_trailing = TRUNCATED_TRAILING.get_or_init(|| {
        Regex::new(r#"(?is)"(?:reason|response|explanation)"\s*:\s*"(.*)$"#).expect("valid regex")
    });

    for re in [escaped_string, lenient_quotes, key_colon_quote, truncated_trailing] {
        if let Some(caps) = re.captures(body) {
            if let Some(m) = caps.get(1) {
                let text = unescape_json_fragment(m.as_str());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    None
}

/// Best-effort unescaping for a JSON string fragment recovered by regex rather than a full
/// parser (the fragment may be missing its closing quote).
fn unescape_json_fragment(fragment: &str) -> String {
    fragment
        .trim_end_matches('"')
        .replace("\\\"", "\"")
        .replace("\\n", "\n")
        .replace("\\\\", "\\")
}
