//! Text fragment extraction from provider payloads.
//!
//! Each frame line that carries JSON (a `data:` line or a bare JSON line) is
//! parsed and walked along `candidates[].content.parts[].text`. Lines that
//! are not JSON, or JSON without that shape, contribute nothing.

use serde_json::Value;

/// Extract every text fragment from one frame, in encounter order.
pub fn extract_fragments(frame: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    for line in frame.lines() {
        let Some(payload) = payload_of(line) else {
            continue;
        };
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => collect_fragments(&value, &mut fragments),
            Err(e) => {
                tracing::trace!(error = %e, line = %payload, "Skipping non-JSON frame line");
            }
        }
    }
    fragments
}

/// Extract fragments from an already-parsed provider response.
///
/// Accepts a single response object or an array of them.
pub fn fragments_from_value(value: &Value) -> Vec<String> {
    let mut fragments = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                collect_fragments(item, &mut fragments);
            }
        }
        other => collect_fragments(other, &mut fragments),
    }
    fragments
}

/// The JSON-bearing part of a line, or `None` if the line carries no payload.
fn payload_of(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') || strip_prefix_ignore_case(line, "event:").is_some() {
        return None;
    }
    let payload = match strip_prefix_ignore_case(line, "data:") {
        Some(rest) => rest.trim(),
        None => line,
    };
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn collect_fragments(value: &Value, out: &mut Vec<String>) {
    let Some(candidates) = value.get("candidates").and_then(Value::as_array) else {
        return;
    };
    for candidate in candidates {
        let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    out.push(text.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_line(text: &str) -> String {
        format!(
            "data: {}",
            serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
            })
        )
    }

    #[test]
    fn test_one_fragment_per_data_line() {
        let frame = [data_line("a"), data_line("b"), data_line("c")].join("\n");
        assert_eq!(extract_fragments(&frame), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let frame = [
            data_line("before"),
            "data: {this is not json".to_string(),
            data_line("after"),
        ]
        .join("\n");
        assert_eq!(extract_fragments(&frame), vec!["before", "after"]);
    }

    #[test]
    fn test_comments_and_event_lines_ignored() {
        let frame = format!(": ping\nEVENT: message\n{}\nid: 7", data_line("x"));
        assert_eq!(extract_fragments(&frame), vec!["x"]);
    }

    #[test]
    fn test_data_prefix_case_insensitive_without_space() {
        let frame = r#"DATA:{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#;
        assert_eq!(extract_fragments(frame), vec!["hi"]);
    }

    #[test]
    fn test_bare_json_line() {
        let frame = r#"  {"candidates":[{"content":{"parts":[{"text":"bare"}]}}]}  "#;
        assert_eq!(extract_fragments(frame), vec!["bare"]);
    }

    #[test]
    fn test_multiple_candidates_and_parts_in_order() {
        let frame = r#"data: {"candidates":[{"content":{"parts":[{"text":"1"},{"text":"2"}]}},{"content":{"parts":[{"text":"3"}]}}]}"#;
        assert_eq!(extract_fragments(frame), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_missing_or_mistyped_fields_yield_nothing() {
        let frame = [
            r#"data: {}"#,
            r#"data: {"candidates":"nope"}"#,
            r#"data: {"candidates":[{"finishReason":"STOP"}]}"#,
            r#"data: {"candidates":[{"content":{"parts":{"text":"not a list"}}}]}"#,
            r#"data: {"candidates":[{"content":{"parts":[{"text":42},{"inlineData":{}},{"text":""}]}}]}"#,
            r#"data: "[DONE]""#,
            "data: [DONE]",
        ]
        .join("\n");
        assert!(extract_fragments(&frame).is_empty());
    }

    #[test]
    fn test_embedded_newlines_and_quotes_preserved() {
        let text = "line one\nline \"two\"";
        assert_eq!(extract_fragments(&data_line(text)), vec![text]);
    }

    #[test]
    fn test_fragments_from_value_object_and_array() {
        let object = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Hello"}, {"text": " world"}]}}]
        });
        assert_eq!(fragments_from_value(&object), vec!["Hello", " world"]);

        let array = serde_json::json!([
            {"candidates": [{"content": {"parts": [{"text": "a"}]}}]},
            {"candidates": [{"content": {"parts": [{"text": "b"}]}}]}
        ]);
        assert_eq!(fragments_from_value(&array), vec!["a", "b"]);
    }

    #[test]
    fn test_multibyte_prefix_does_not_panic() {
        assert!(extract_fragments("é").is_empty());
        assert!(extract_fragments("日本語データ").is_empty());
    }
}
