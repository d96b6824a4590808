use std::collections::HashMap;

use crate::error::QueryError;

/// Wire format of a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per row, newline separated.
    Ndjson,
    /// Single `JSONCompact` envelope with meta, data and statistics.
    Json,
}

impl OutputFormat {
    /// Parse a format token. Tokens are case-sensitive.
    pub fn from_token(token: &str) -> Result<Self, QueryError> {
        match token {
            "JSONEachRow" | "ndjson" | "jsonl" => Ok(OutputFormat::Ndjson),
            "JSONCompact" => Ok(OutputFormat::Json),
            _ => Err(QueryError::request_format("Unknown format")),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Ndjson => "application/x-ndjson",
            OutputFormat::Json => "application/json",
        }
    }
}

/// Value bound to a named statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundValue {
    Text(String),
    Boolean(bool),
}

/// Named parameters, keyed case-insensitively.
///
/// Keys are lower-cased on insert and lookup. Inserting a key that
/// collides after lower-casing replaces the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    values: HashMap<String, BoundValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: BoundValue) -> Option<BoundValue> {
        self.values.insert(name.to_lowercase(), value)
    }

    pub fn get(&self, name: &str) -> Option<&BoundValue> {
        self.values.get(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Normalized (lower-case) names with their values, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoundValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Request after both input modes have been reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub sql: String,
    pub parameters: Option<Parameters>,
    pub format: OutputFormat,
}

impl NormalizedQuery {
    /// Parameters that require a prepared statement, if any were supplied.
    pub fn bindings(&self) -> Option<&Parameters> {
        self.parameters.as_ref().filter(|p| !p.is_empty())
    }
}

/// How the encoder treats values that have no valid JSON rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingPolicy {
    /// Render non-finite floats and unsupported kinds as `null` instead of failing.
    pub coerce_invalid_to_null: bool,
}
