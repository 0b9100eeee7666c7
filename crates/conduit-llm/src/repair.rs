//! Best-effort repair of tool-call argument text.
//!
//! Streamed arguments are concatenated slices and are not guaranteed to form
//! valid JSON even when the model produced a complete argument set: chunks
//! can be duplicated, truncated, or wrapped in markdown fences.

use serde_json::Value;

const LITERALS: &[&str] = &["true", "false", "null"];

/// Attempts to turn `input` into syntactically valid JSON text.
///
/// Already-valid input is returned trimmed but otherwise byte-for-byte.
/// Returns `None` when no repair produced parseable JSON; callers keep the
/// original text then.
pub fn repair_json(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some("{}".to_string());
    }
    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    let body = strip_code_fence(trimmed);
    let start = body.find(['{', '['])?;
    let body = &body[start..];

    if let Some(value) = first_complete_value(body) {
        return serde_json::to_string(&value).ok();
    }

    close_structure(body)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses back-to-back JSON values and returns the first non-empty one.
/// Some providers resend the arguments, or send `{}` before the real payload.
fn first_complete_value(body: &str) -> Option<Value> {
    let values: Vec<Value> = serde_json::Deserializer::from_str(body)
        .into_iter::<Value>()
        .map_while(Result::ok)
        .collect();
    let is_empty = |v: &Value| match v {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    values
        .iter()
        .find(|v| !is_empty(v))
        .or_else(|| values.first())
        .cloned()
}

/// A position the text can be cut back to, with the open brackets at that point.
struct Boundary {
    len: usize,
    stack: Vec<char>,
}

fn close_structure(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut boundary: Option<Boundary> = None;
    let mut in_string = false;
    let mut escaped = false;

    for c in body.chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                stack.push(if c == '{' { '}' } else { ']' });
                out.push(c);
                boundary = Some(Boundary {
                    len: out.len(),
                    stack: stack.clone(),
                });
            }
            '}' | ']' => {
                if stack.last() != Some(&c) {
                    continue;
                }
                trim_trailing_comma(&mut out);
                stack.pop();
                out.push(c);
                if stack.is_empty() {
                    break;
                }
            }
            ',' => {
                boundary = Some(Boundary {
                    len: out.len(),
                    stack: stack.clone(),
                });
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    let closers = |stack: &[char]| stack.iter().rev().collect::<String>();

    let mut tail_fixed = out.clone();
    fix_tail(&mut tail_fixed);
    let mut candidates = vec![
        format!("{tail_fixed}{}", closers(&stack)),
        format!("{tail_fixed}:null{}", closers(&stack)),
    ];
    if let Some(b) = boundary {
        let mut cut = out[..b.len].to_string();
        trim_trailing_comma(&mut cut);
        candidates.push(format!("{cut}{}", closers(&b.stack)));
    }

    candidates
        .into_iter()
        .find(|candidate| serde_json::from_str::<Value>(candidate).is_ok())
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
}

/// Completes a dangling token at the very end of the text.
fn fix_tail(out: &mut String) {
    trim_trailing_comma(out);
    if out.ends_with(':') {
        out.push_str("null");
        return;
    }
    while out.ends_with(['.', '-', '+', 'e', 'E']) && !ends_with_literal(out) {
        out.pop();
    }
    // Only ASCII letters are trimmed, so the cut is always on a char boundary.
    let word_start = out.trim_end_matches(|c: char| c.is_ascii_alphabetic()).len();
    let word = &out[word_start..];
    if !word.is_empty() {
        if let Some(literal) = LITERALS.iter().find(|l| l.starts_with(word)) {
            let rest = &literal[word.len()..];
            out.push_str(rest);
        }
    }
}

fn ends_with_literal(out: &str) -> bool {
    LITERALS.iter().any(|l| out.ends_with(l))
}
