//! Final-answer extraction from free-form generations.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

const BOXED_MARKER: &str = "\\boxed{";
const THINK_CLOSE: &str = "</think>";

/// Contents of the last `\boxed{...}` group in `raw`.
///
/// The scan tracks brace depth so nested groups survive intact. Unbalanced
/// input yields whatever was collected before the text ran out; a missing
/// marker yields an empty string.
pub fn extract_last_boxed(raw: &str) -> String {
    let Some(start) = raw.rfind(BOXED_MARKER) else {
        return String::new();
    };

    let mut depth = 1usize;
    let mut out = String::new();
    for ch in raw[start + BOXED_MARKER.len()..].chars() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        out.push(ch);
    }
    out.trim().to_string()
}

/// The answer to grade for one sample: a pre-separated final answer wins
/// verbatim, boxed extraction from the reasoning text is the fallback.
pub fn resolve_answer(final_answer: &str, reasoning: &str) -> String {
    if !final_answer.is_empty() {
        return final_answer.to_string();
    }
    extract_last_boxed(reasoning)
}

static OPEN_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([a-zA-Z ]+?)>").expect("valid regex"));

/// Map each `<tag>...</tag>` pair to its trimmed inner text.
///
/// Matching is case-sensitive and non-greedy (the nearest closing tag ends the
/// span). When a tag occurs more than once the first pair wins.
pub fn extract_tag_contents(raw: &str) -> HashMap<String, String> {
    let mut found = HashMap::new();
    let mut cursor = 0;
    while let Some(caps) = OPEN_TAG_RE.captures_at(raw, cursor) {
        let (Some(open), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let close = format!("</{}>", name.as_str());
        match raw[open.end()..].find(&close) {
            Some(offset) => {
                let inner = &raw[open.end()..open.end() + offset];
                found
                    .entry(name.as_str().trim().to_string())
                    .or_insert_with(|| inner.trim().to_string());
                cursor = open.end() + offset + close.len();
            }
            None => cursor = open.end(),
        }
    }
    found
}

/// Drop a leading thinking section: everything up to the last `</think>`.
pub fn strip_thinking(text: &str) -> &str {
    match text.rfind(THINK_CLOSE) {
        Some(idx) => &text[idx + THINK_CLOSE.len()..],
        None => text,
    }
}

/// Keep the first `max` blank-line separated chunks of `text`.
pub fn truncate_paragraphs(text: &str, max: usize) -> String {
    text.split("\n\n").take(max).collect::<Vec<_>>().join("\n\n")
}
