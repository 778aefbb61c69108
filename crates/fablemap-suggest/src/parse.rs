//! Recover a JSON instruction payload from free-form LLM output.

use serde_json::Value;

/// Most candidate spans tried per reply.
const MAX_CANDIDATES: usize = 32;

/// Find the first JSON object or array in `raw`.
///
/// Looks at a fenced code block first, then at bracket-balanced substrings
/// (string literals respected). Only when none of those parse is a
/// single-quote repair attempted on the same candidates.
pub fn extract_payload(raw: &str) -> Option<Value> {
    extract_payload_where(raw, |_| true)
}

/// Like [`extract_payload`], but skips structured values `accept` rejects,
/// so a stray `[1]` in prose does not shadow the real payload after it.
pub fn extract_payload_where(raw: &str, accept: impl Fn(&Value) -> bool) -> Option<Value> {
    let candidates = candidates(raw);
    candidates
        .iter()
        .filter_map(|c| parse_structured(c))
        .find(|v| accept(v))
        .or_else(|| {
            candidates
                .iter()
                .filter_map(|c| parse_structured(&repair_quotes(c)))
                .find(|v| accept(v))
        })
}

fn parse_structured(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn candidates(raw: &str) -> Vec<&str> {
    let mut out = Vec::new();
    if let Some(block) = fenced_block(raw) {
        out.push(block.trim());
        out.extend(balanced_spans(block));
    }
    out.extend(balanced_spans(raw));
    out.truncate(MAX_CANDIDATES);
    out
}

/// Body of the first ``` fence, without its language tag. An unterminated
/// fence runs to the end of the text.
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after = &raw[open + 3..];
    let body = match after.split_once('\n') {
        Some((tag, rest)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => rest,
        _ => after
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim_start(),
    };
    Some(body.find("```").map_or(body, |end| &body[..end]))
}

/// Every `{...}` / `[...]` span whose brackets balance, outermost first.
fn balanced_spans(text: &str) -> Vec<&str> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .filter_map(|(start, _)| matching_close(text, start).map(|end| &text[start..=end]))
        .take(MAX_CANDIDATES)
        .collect()
}

fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
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
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Turn single-quoted strings into double-quoted ones. Apostrophes inside
/// double-quoted strings are left alone.
fn repair_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_double = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_double {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_double = false;
            }
            out.push(ch);
            continue;
        }
        match ch {
            '"' => {
                in_double = true;
                out.push(ch);
            }
            '\'' => out.push('"'),
            _ => out.push(ch),
        }
    }
    out
}
