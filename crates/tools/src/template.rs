//! `{name}` template interpolation over a JSON data map.
//!
//! - `{name}`, `{a.b}`, `{outputs[0]}`: replaced by the value at that path
//! - `{{` / `}}`: literal braces
//! - anything else in braces (unknown names, JSON snippets) is left untouched
//!
//! Strings are inserted raw; other values are inserted as compact JSON.
//! No expressions are evaluated.

use serde_json::Value;

/// One step of a placeholder path.
#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse a placeholder body such as `outputs[0]` or `vars.task_id`.
fn parse_path(body: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = body;
    let mut expect_key = true;

    while !rest.is_empty() {
        if expect_key {
            let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
            if end == 0 {
                return None;
            }
            segments.push(Segment::Key(&rest[..end]));
            rest = &rest[end..];
            expect_key = false;
        } else if let Some(after) = rest.strip_prefix('.') {
            rest = after;
            expect_key = true;
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']')?;
            let index = after[..close].trim().parse().ok()?;
            segments.push(Segment::Index(index));
            rest = &after[close + 1..];
        } else {
            return None;
        }
    }

    if expect_key { None } else { Some(segments) }
}

fn lookup<'v>(data: &'v Value, path: &[Segment<'_>]) -> Option<&'v Value> {
    path.iter().try_fold(data, |value, segment| match segment {
        Segment::Key(key) => value.get(*key),
        Segment::Index(i) => value.get(*i),
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render `template` against `data` (normally a JSON object).
pub fn render(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if let Some(after) = rest.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = rest.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if let Some(after) = rest.strip_prefix('{') {
            let replaced = after.find('}').and_then(|close| {
                let body = &after[..close];
                let path = parse_path(body)?;
                let value = lookup(data, &path)?;
                Some((display(value), close))
            });
            match replaced {
                Some((text, close)) => {
                    out.push_str(&text);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        } else {
            // A lone `}`
            out.push('}');
            rest = &rest[1..];
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_names() {
        let data = json!({"language": "English", "time": "2025-01-01 00:00:00"});
        assert_eq!(
            render("Answer in {language} at {time}.", &data),
            "Answer in English at 2025-01-01 00:00:00."
        );
    }

    #[test]
    fn double_braces_are_literal() {
        let data = json!({"tool": "x"});
        assert_eq!(
            render("{{\n  \"tool\": \"{tool}\"\n}}", &data),
            "{\n  \"tool\": \"x\"\n}"
        );
    }

    #[test]
    fn unknown_placeholders_stay() {
        let data = json!({"a": 1});
        assert_eq!(render("{missing} and {a}", &data), "{missing} and 1");
        assert_eq!(render("{ \"json\": true }", &data), "{ \"json\": true }");
        assert_eq!(render("unclosed {a", &data), "unclosed {a");
    }

    #[test]
    fn paths_and_indexes() {
        let data = json!({"outputs": ["first", {"k": "v"}], "chat": {"name": "n"}});
        assert_eq!(render("{outputs[0]}", &data), "first");
        assert_eq!(render("{outputs[1].k}", &data), "v");
        assert_eq!(render("{outputs[1]}", &data), r#"{"k":"v"}"#);
        assert_eq!(render("{chat.name}", &data), "n");
        assert_eq!(render("{outputs[9]}", &data), "{outputs[9]}");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let data = json!({"n": 3, "flag": true, "none": null});
        assert_eq!(render("{n}/{flag}/{none}", &data), "3/true/null");
    }

    #[test]
    fn multibyte_text_is_preserved() {
        let data = json!({"name": "世界"});
        assert_eq!(render("你好，{name}！}", &data), "你好，世界！}");
    }
}
