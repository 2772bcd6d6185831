use serde_json::Value;

/// Strip a surrounding Markdown code fence (```json ... ```), if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse a model reply as a JSON object or array.
pub fn parse_model_json(text: &str) -> Result<Value, String> {
    let body = strip_code_fences(text);
    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Ok(value),
        Ok(_) => Err("model output was not a JSON object".to_string()),
        Err(_) => Err("model output was not valid JSON".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let v = parse_model_json(r#"{"summary": "ok"}"#).unwrap();
        assert_eq!(v["summary"], "ok");
    }

    #[test]
    fn test_fenced_json() {
        let reply = "```json\n{\"keywords\": [\"dragons\"]}\n```";
        let v = parse_model_json(reply).unwrap();
        assert_eq!(v["keywords"][0], "dragons");

        let bare = "```\n[1, 2]\n```\n";
        assert!(parse_model_json(bare).unwrap().is_array());
    }

    #[test]
    fn test_malformed() {
        assert_eq!(
            parse_model_json("Here are my notes: chapter one drags.").unwrap_err(),
            "model output was not valid JSON"
        );
        assert_eq!(
            parse_model_json("\"just a string\"").unwrap_err(),
            "model output was not a JSON object"
        );
        assert!(parse_model_json("```json\n{\"a\": \n```").is_err());
    }
}
