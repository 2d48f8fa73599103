//! Fault-tolerant JSON recovery from model output.
//!
//! Models wrap their JSON in prose, code fences, or `<think>` blocks, and
//! sometimes emit a broken object before a good one. The scanner walks every
//! `{` / `[` start position in order, follows brackets to the matching close
//! (ignoring brackets inside string literals, honoring escapes), and returns
//! the first balanced span that parses.

use serde_json::Value;

/// Find the first balanced span starting at `start` (which must be `{` or `[`).
///
/// Returns the exclusive end index, or `None` if the span never closes or
/// brackets are mismatched.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                let open = if b == b'}' { b'{' } else { b'[' };
                if stack.pop() != Some(open) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Recover the first parsable JSON object or array embedded in `text`.
pub fn extract_json_value(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'{' || b == b'[')
        .find_map(|(start, _)| {
            let end = balanced_end(bytes, start)?;
            // Brackets are ASCII, so both indices sit on char boundaries.
            serde_json::from_str::<Value>(&text[start..end]).ok()
        })
}

/// Like [`extract_json_value`], re-serialized with two-space indentation.
pub fn extract_json(text: &str) -> Option<String> {
    extract_json_value(text).and_then(|v| serde_json::to_string_pretty(&v).ok())
}

/// Parse `content` as JSON, falling back to extraction from surrounding noise.
pub fn parse_json_content(content: &str) -> Option<Value> {
    serde_json::from_str(content)
        .ok()
        .or_else(|| extract_json_value(content))
}

/// Loose truthiness: `null`, `false`, `0`, and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
