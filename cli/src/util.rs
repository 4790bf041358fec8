use serde_json::{Map, Value, json};

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", pretty(&err));
    std::process::exit(4);
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Exit code for a response: 0 = 2xx, 1 = 4xx, 2 = 5xx.
/// A kept-alive invocation answers `200` even when it failed, so a body
/// with `status: "failed"` also maps to 2.
pub fn exit_code_for(status: u16, body: &Value) -> i32 {
    match status {
        200..=299 if body["status"] == "failed" => 2,
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Parse a response body. Gateway invocations may prefix the JSON with
/// keep-alive whitespace, which JSON parsing already skips.
pub fn parse_response_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|e| {
        json!({
            "raw_error": format!("Failed to parse response as JSON: {e}"),
            "raw_body": text.trim(),
        })
    })
}

/// Execute an API request, print the response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx)
///             or failed invocation, 3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
    raw: bool,
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/'))) {
        Ok(u) => u,
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {api_url}{path}: {e}")
            });
            eprintln!("{}", pretty(&err));
            return 4;
        }
    };

    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the gateway running? Check TOOLGATE_API_URL."
            });
            eprintln!("{}", pretty(&err));
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let resp_body = match resp.text().await {
        Ok(text) => parse_response_body(&text),
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("Response body could not be read: {e}")
            });
            eprintln!("{}", pretty(&err));
            return 3;
        }
    };
    let exit_code = exit_code_for(status, &resp_body);

    let formatted = if raw {
        resp_body.to_string()
    } else {
        pretty(&resp_body)
    };

    if exit_code == 0 {
        println!("{formatted}");
    } else {
        eprintln!("{formatted}");
    }

    exit_code
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<Value, String> {
    let raw = if path == "-" {
        std::io::read_to_string(std::io::stdin()).map_err(|e| format!("Failed to read stdin: {e}"))?
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}

/// Fold `key=value` / `key:=json` pairs into a JSON object.
///
/// `key=value` sets a string, `key:=json` sets a raw JSON value. Repeating
/// a key collects its values into an array.
pub fn parse_args(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut fields = Map::new();
    for pair in pairs {
        let (key, value) = if let Some((key, raw)) = pair.split_once(":=") {
            let value = serde_json::from_str(raw)
                .map_err(|e| format!("Invalid JSON value for '{key}': {e}"))?;
            (key, value)
        } else if let Some((key, text)) = pair.split_once('=') {
            (key, Value::String(text.to_string()))
        } else {
            return Err(format!("Invalid argument: '{pair}'"));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid argument: '{pair}' has an empty key"));
        }

        let Some(existing) = fields.get_mut(key) else {
            fields.insert(key.to_string(), value);
            continue;
        };
        match existing {
            Value::Array(items) if !value.is_array() => items.push(value),
            _ => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn repeated_keys_become_arrays() {
        let fields = parse_args(&strings(&[
            "subscriptionId=sub-123",
            "resourceGroups=rg-a",
            "resourceGroups=rg-b",
            "resourceGroups=rg-c",
        ]))
        .unwrap();
        assert_eq!(fields["subscriptionId"], "sub-123");
        assert_eq!(fields["resourceGroups"], json!(["rg-a", "rg-b", "rg-c"]));
    }

    #[test]
    fn typed_values_use_colon_equals() {
        let fields = parse_args(&strings(&[
            "resourceGroups:=[\"rg-a\"]",
            "depth:=3",
            "verbose:=true",
            "query=a=b",
        ]))
        .unwrap();
        assert_eq!(fields["resourceGroups"], json!(["rg-a"]));
        assert_eq!(fields["depth"], 3);
        assert_eq!(fields["verbose"], true);
        assert_eq!(fields["query"], "a=b");
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(parse_args(&strings(&["novalue"])).is_err());
        assert!(parse_args(&strings(&["=x"])).is_err());
        assert!(parse_args(&strings(&["n:={"])).is_err());
    }

    #[test]
    fn whitespace_prefixed_bodies_parse() {
        let body = parse_response_body("     {\"status\":\"completed\"}");
        assert_eq!(body["status"], "completed");
        assert_eq!(parse_response_body("  "), Value::Null);
        assert!(parse_response_body("<html>").get("raw_error").is_some());
    }

    #[test]
    fn failed_invocations_exit_non_zero_even_on_200() {
        assert_eq!(exit_code_for(200, &json!({ "status": "completed" })), 0);
        assert_eq!(exit_code_for(200, &json!({ "status": "failed" })), 2);
        assert_eq!(exit_code_for(404, &json!({})), 1);
        assert_eq!(exit_code_for(500, &json!({})), 2);
        assert_eq!(exit_code_for(202, &json!({ "message": "stop requested" })), 0);
    }
}
