//! The typed-object procedure (`spec.md` §4.6), used by both pipeline
//! generation and pipeline modification to coerce free-form model text
//! into a schema-validated JSON value.
//!
//! Same request/validate/retry shape as an HTTP client's retry loop,
//! applied to model text: try, validate, log-and-retry bounded by a count,
//! propagate the last error on exhaustion.

use serde_json::Value;

use crate::capability;

/// Strip Markdown code fences (keeping their contents) and return the last
/// balanced, string-literal-aware JSON object or array substring, or `None`
/// if none is found (`spec.md` §4.6: "Strip fenced code blocks and locate
/// the final JSON object/array substring").
#[must_use]
pub fn extract_json(text: &str) -> Option<String> {
    let stripped = strip_code_fences(text);
    last_balanced_json_value(&stripped)
}

fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Scan for top-level `{...}` / `[...]` spans, honoring string literals and
/// escapes so braces inside strings don't confuse the bracket count, and
/// return the last complete one found.
fn last_balanced_json_value(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut stack: Vec<usize> = Vec::new();
    let mut candidates = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => stack.push(i),
            '}' | ']' => {
                if let Some(start) = stack.pop() {
                    if stack.is_empty() {
                        let candidate: String = chars[start..=i].iter().collect();
                        candidates.push(candidate);
                    }
                }
            }
            _ => {}
        }
    }

    candidates.pop()
}

/// Parse `text` as JSON (after extracting the final fenced/unfenced JSON
/// value) and validate it against `schema`.
pub fn parse_and_validate(text: &str, schema: &Value) -> std::result::Result<Value, String> {
    let candidate = extract_json(text).ok_or_else(|| "no JSON object or array found in model output".to_string())?;
    let parsed: Value = serde_json::from_str(&candidate).map_err(|e| format!("failed to parse JSON: {e}"))?;
    capability::validate(schema, &parsed)?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_object_from_fenced_block() {
        let text = "Here is the plan:\n```json\n{\"a\": 1, \"b\": [1,2,3]}\n```\nDone.";
        let extracted = extract_json(text).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&extracted).unwrap(), json!({"a": 1, "b": [1,2,3]}));
    }

    #[test]
    fn picks_last_top_level_value_when_several_present() {
        let text = "{\"first\": true} then {\"second\": true}";
        let extracted = extract_json(text).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&extracted).unwrap(), json!({"second": true}));
    }

    #[test]
    fn braces_inside_strings_do_not_break_matching() {
        let text = r#"{"note": "a { b } c", "value": 2}"#;
        let extracted = extract_json(text).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&extracted).unwrap(), json!({"note": "a { b } c", "value": 2}));
    }

    #[test]
    fn no_json_returns_none() {
        assert!(extract_json("no structured data here").is_none());
    }

    #[test]
    fn parse_and_validate_rejects_schema_mismatch() {
        let schema = json!({"type": "object", "required": ["name"]});
        let err = parse_and_validate("{\"other\": 1}", &schema).unwrap_err();
        assert!(!err.is_empty());
    }
}
