use std::collections::HashMap;

use axum::http::{HeaderMap, Method, header};
use serde_json::Value;

use flock_api::{BoundValue, NormalizedQuery, OutputFormat, Parameters, QueryError};

/// Turn either request encoding into one `NormalizedQuery`.
///
/// `Ok(None)` means the request carries no query at all; the caller serves
/// the playground page instead.
pub fn normalize(
    method: &Method,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    body: &[u8],
) -> Result<Option<NormalizedQuery>, QueryError> {
    if method == Method::POST && is_json(headers) {
        return complex(body).map(Some);
    }

    let sql = simple_sql(method, params, body)?;
    let format = simple_format(headers, params)?;
    Ok(sql.map(|sql| NormalizedQuery {
        sql,
        parameters: None,
        format,
    }))
}

/// Media type `application/json`, parameters such as `charset` ignored.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

// ---------------------------------------------------------------------------
// Simple mode: query string, headers, raw body
// ---------------------------------------------------------------------------

fn simple_sql(
    method: &Method,
    params: &HashMap<String, String>,
    body: &[u8],
) -> Result<Option<String>, QueryError> {
    if let Some(sql) = params.get("query").or_else(|| params.get("q")) {
        return Ok(Some(sql.clone()));
    }
    if method == Method::POST && !body.is_empty() {
        let sql = std::str::from_utf8(body)
            .map_err(|_| QueryError::request_format("The request body must be valid UTF-8"))?;
        return Ok(Some(sql.to_string()));
    }
    Ok(None)
}

pub(crate) fn simple_format(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<OutputFormat, QueryError> {
    if let Some(token) = params.get("default_format") {
        return OutputFormat::from_token(token);
    }
    for name in ["x-clickhouse-format", "format"] {
        if let Some(value) = headers.get(name) {
            return OutputFormat::from_token(&String::from_utf8_lossy(value.as_bytes()));
        }
    }
    Ok(OutputFormat::Ndjson)
}

// ---------------------------------------------------------------------------
// Complex mode: JSON body with typed parameters
// ---------------------------------------------------------------------------

fn complex(body: &[u8]) -> Result<NormalizedQuery, QueryError> {
    let root: Value = serde_json::from_slice(body)
        .map_err(|_| QueryError::request_format("Unable to parse the request body"))?;
    let Value::Object(root) = root else {
        return Err(QueryError::request_format("The request body must be an object"));
    };

    let Some(Value::String(sql)) = root.get("query") else {
        return Err(QueryError::request_format("The `query` field must be a string"));
    };
    let Some(Value::String(format)) = root.get("format") else {
        return Err(QueryError::request_format("The `format` field must be a string"));
    };
    let parameters = match root.get("parameters") {
        None => None,
        Some(Value::Object(entries)) => {
            let mut parameters = Parameters::new();
            for (key, entry) in entries {
                parameters.insert(key, bound_parameter(key, entry)?);
            }
            Some(parameters)
        }
        Some(_) => {
            return Err(QueryError::request_format(
                "The `parameters` field must be an object",
            ));
        }
    };

    Ok(NormalizedQuery {
        sql: sql.clone(),
        parameters,
        format: OutputFormat::from_token(format)?,
    })
}

fn bound_parameter(key: &str, entry: &Value) -> Result<BoundValue, QueryError> {
    let Value::Object(entry) = entry else {
        return Err(QueryError::request_format(format!(
            "The parameter `{key}` must be an object"
        )));
    };

    let ty = match entry.get("type") {
        None => {
            return Err(QueryError::request_format(format!(
                "The parameter `{key}` does not have a `type` field"
            )));
        }
        Some(Value::String(ty)) => ty.as_str(),
        Some(_) => {
            return Err(QueryError::request_format(format!(
                "The field `type` for the parameter `{key}` must be a string"
            )));
        }
    };

    let Some(value) = entry.get("value") else {
        return Err(QueryError::request_format(format!(
            "The parameter `{key}` does not have a `value` field"
        )));
    };

    match (ty, value) {
        ("TEXT", Value::String(s)) => Ok(BoundValue::Text(s.clone())),
        ("TEXT", _) => Err(QueryError::request_format(format!(
            "The field `value` for the parameter `{key}` must be a string"
        ))),
        ("BOOLEAN", Value::Bool(b)) => Ok(BoundValue::Boolean(*b)),
        ("BOOLEAN", _) => Err(QueryError::request_format(format!(
            "The field `value` for the parameter `{key}` must be a boolean"
        ))),
        (other, _) => Err(QueryError::request_format(format!(
            "Unsupported type {other} for the parameter `{key}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flock_api::ErrorKind;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn complex_err(body: &str) -> String {
        let err = normalize(&Method::POST, &json_headers(), &HashMap::new(), body.as_bytes())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestFormat);
        err.message().to_string()
    }

    #[test]
    fn simple_query_precedence() {
        let q = normalize(
            &Method::GET,
            &HeaderMap::new(),
            &params(&[("q", "SELECT 2"), ("query", "SELECT 1")]),
            b"",
        )
        .unwrap()
        .unwrap();
        assert_eq!(q.sql, "SELECT 1");
        assert_eq!(q.format, OutputFormat::Ndjson);
        assert!(q.parameters.is_none());

        let q = normalize(&Method::POST, &HeaderMap::new(), &HashMap::new(), b"SELECT 3")
            .unwrap()
            .unwrap();
        assert_eq!(q.sql, "SELECT 3");
    }

    #[test]
    fn get_ignores_body() {
        let q = normalize(&Method::GET, &HeaderMap::new(), &HashMap::new(), b"SELECT 3").unwrap();
        assert!(q.is_none());
    }

    #[test]
    fn no_query_means_playground() {
        let q = normalize(&Method::POST, &HeaderMap::new(), &HashMap::new(), b"").unwrap();
        assert!(q.is_none());
    }

    #[test]
    fn format_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-clickhouse-format", HeaderValue::from_static("JSONCompact"));
        headers.insert("format", HeaderValue::from_static("bogus"));

        let q = normalize(
            &Method::GET,
            &headers,
            &params(&[("query", "SELECT 1"), ("default_format", "JSONEachRow")]),
            b"",
        )
        .unwrap()
        .unwrap();
        assert_eq!(q.format, OutputFormat::Ndjson);

        let q = normalize(&Method::GET, &headers, &params(&[("query", "SELECT 1")]), b"")
            .unwrap()
            .unwrap();
        assert_eq!(q.format, OutputFormat::Json);

        headers.remove("x-clickhouse-format");
        let err = normalize(&Method::GET, &headers, &params(&[("query", "SELECT 1")]), b"")
            .unwrap_err();
        assert_eq!(err.message(), "Unknown format");
    }

    #[test]
    fn invalid_utf8_body_is_rejected() {
        let err = normalize(&Method::POST, &HeaderMap::new(), &HashMap::new(), &[0xff, 0xfe])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestFormat);
    }

    #[test]
    fn complex_mode_with_parameters() {
        let body = r#"{"query":"SELECT :Name, :flag","format":"JSONCompact",
            "parameters":{"Name":{"type":"TEXT","value":"x"},"flag":{"type":"BOOLEAN","value":false}}}"#;
        let q = normalize(&Method::POST, &json_headers(), &HashMap::new(), body.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(q.format, OutputFormat::Json);
        let p = q.parameters.unwrap();
        assert_eq!(p.get("name"), Some(&BoundValue::Text("x".into())));
        assert_eq!(p.get("FLAG"), Some(&BoundValue::Boolean(false)));
    }

    #[test]
    fn complex_mode_parameters_are_optional() {
        let body = r#"{"query":"SELECT 1","format":"jsonl"}"#;
        let q = normalize(&Method::POST, &json_headers(), &HashMap::new(), body.as_bytes())
            .unwrap()
            .unwrap();
        assert!(q.parameters.is_none());
        assert_eq!(q.format, OutputFormat::Ndjson);
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let body = br#"{"query":"SELECT 1","format":"JSONCompact"}"#;
        let q = normalize(&Method::POST, &headers, &HashMap::new(), body).unwrap().unwrap();
        assert_eq!(q.format, OutputFormat::Json);
    }

    #[test]
    fn complex_mode_envelope_errors() {
        assert_eq!(complex_err("{"), "Unable to parse the request body");
        assert_eq!(complex_err("[]"), "The request body must be an object");
        assert_eq!(complex_err(r#"{"format":"jsonl"}"#), "The `query` field must be a string");
        assert_eq!(complex_err(r#"{"query":"SELECT 1"}"#), "The `format` field must be a string");
        assert_eq!(
            complex_err(r#"{"query":"SELECT 1","format":"bogus"}"#),
            "Unknown format"
        );
        assert_eq!(
            complex_err(r#"{"query":"SELECT 1","format":"jsonl","parameters":[]}"#),
            "The `parameters` field must be an object"
        );
    }

    #[test]
    fn complex_mode_parameter_errors() {
        let wrap = |p: &str| format!(r#"{{"query":"SELECT 1","format":"jsonl","parameters":{{"k":{p}}}}}"#);
        assert_eq!(complex_err(&wrap("1")), "The parameter `k` must be an object");
        assert_eq!(
            complex_err(&wrap(r#"{"value":"x"}"#)),
            "The parameter `k` does not have a `type` field"
        );
        assert_eq!(
            complex_err(&wrap(r#"{"type":1,"value":"x"}"#)),
            "The field `type` for the parameter `k` must be a string"
        );
        assert_eq!(
            complex_err(&wrap(r#"{"type":"TEXT"}"#)),
            "The parameter `k` does not have a `value` field"
        );
        assert_eq!(
            complex_err(&wrap(r#"{"type":"TEXT","value":1}"#)),
            "The field `value` for the parameter `k` must be a string"
        );
        assert_eq!(
            complex_err(&wrap(r#"{"type":"BOOLEAN","value":"true"}"#)),
            "The field `value` for the parameter `k` must be a boolean"
        );
        assert_eq!(
            complex_err(&wrap(r#"{"type":"INTEGER","value":1}"#)),
            "Unsupported type INTEGER for the parameter `k`"
        );
    }

    #[test]
    fn plain_post_with_json_body_is_simple_mode() {
        let body = br#"{"query":"SELECT 1","format":"JSONCompact"}"#;
        let q = normalize(&Method::POST, &HeaderMap::new(), &HashMap::new(), body)
            .unwrap()
            .unwrap();
        assert_eq!(q.sql, r#"{"query":"SELECT 1","format":"JSONCompact"}"#);
    }
}
