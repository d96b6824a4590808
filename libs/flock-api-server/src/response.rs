use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};

use flock_api::{ColumnSchema, EncodingPolicy, QueryError, ResultSet, Row};

use crate::encoder::ValueEncoder;

/// The two response strategies over one result set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseFormatter {
    encoder: ValueEncoder,
}

#[derive(Serialize)]
struct ColumnMeta<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Serialize)]
struct Statistics {
    elapsed: f64,
    rows_read: u64,
    bytes_read: u64,
}

#[derive(Serialize)]
struct CompactDocument<'a> {
    meta: Vec<ColumnMeta<'a>>,
    data: Vec<Value>,
    rows: usize,
    statistics: Statistics,
}

impl ResponseFormatter {
    pub fn new(policy: EncodingPolicy) -> Self {
        Self {
            encoder: ValueEncoder::new(policy),
        }
    }

    // ═══════════════════════════════════════════════════════════════
    //  NDJSON
    // ═══════════════════════════════════════════════════════════════

    /// One NDJSON line (with trailing `\n`) for `row`, keyed by column name.
    ///
    /// Each line is an independent document: nothing is shared with the
    /// lines before or after it.
    pub fn ndjson_line(&self, columns: &[ColumnSchema], row: &Row) -> Result<String, QueryError> {
        let mut document = Value::Object(Map::new());
        for (column, value) in columns.iter().zip(row) {
            self.encoder
                .append_into(&mut document, value, &column.ty, Some(&column.name))?;
        }
        let mut line = serde_json::to_string(&document)?;
        line.push('\n');
        Ok(line)
    }

    /// Stream `rs` line by line into `emit`.
    ///
    /// Lines are handed over as soon as they are encoded. On failure the
    /// lines already emitted stay emitted; the error is returned and no
    /// further rows are read. `emit` returns `false` to stop early (the
    /// reader went away). Returns the number of lines emitted.
    pub fn write_ndjson(
        &self,
        rs: &mut ResultSet<'_>,
        mut emit: impl FnMut(String) -> bool,
    ) -> Result<u64, QueryError> {
        let columns = rs.columns().to_vec();
        let mut lines = 0;
        for row in rs.by_ref() {
            let line = self.ndjson_line(&columns, &row?)?;
            if !emit(line) {
                break;
            }
            lines += 1;
        }
        Ok(lines)
    }

    /// Whole NDJSON body in memory; all or nothing.
    pub fn ndjson(&self, rs: &mut ResultSet<'_>) -> Result<String, QueryError> {
        let mut body = String::new();
        self.write_ndjson(rs, |line| {
            body.push_str(&line);
            true
        })?;
        Ok(body)
    }

    // ═══════════════════════════════════════════════════════════════
    //  JSONCompact
    // ═══════════════════════════════════════════════════════════════

    /// Single document with `meta`, positional `data`, `rows` and
    /// `statistics`. Serialized once; any failure yields no body at all.
    ///
    /// `executed` is the time until the first row was ready; the reported
    /// `elapsed` adds the time spent draining the rows here.
    pub fn compact(&self, rs: &mut ResultSet<'_>, executed: Duration) -> Result<String, QueryError> {
        let drain = Instant::now();
        let columns = rs.columns().to_vec();
        let mut data = Vec::new();
        for row in rs.by_ref() {
            let row = row?;
            let mut cells = Value::Array(Vec::with_capacity(columns.len()));
            for (column, value) in columns.iter().zip(&row) {
                self.encoder.append_into(&mut cells, value, &column.ty, None)?;
            }
            data.push(cells);
        }

        let document = CompactDocument {
            meta: columns
                .iter()
                .map(|c| ColumnMeta {
                    name: &c.name,
                    type_name: c.ty.type_name(),
                })
                .collect(),
            rows: data.len(),
            data,
            statistics: Statistics {
                elapsed: (executed + drain.elapsed()).as_secs_f64(),
                rows_read: rs.rows_read(),
                bytes_read: rs.bytes_read(),
            },
        };
        Ok(serde_json::to_string(&document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flock_api::{DeclaredType, TypedValue};
    use serde_json::json;

    fn columns() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id", DeclaredType::BigInt),
            ColumnSchema::new("tags", DeclaredType::List(Box::new(DeclaredType::Varchar))),
            ColumnSchema::new("big", DeclaredType::HugeInt),
        ]
    }

    fn row(id: i64) -> Row {
        vec![
            TypedValue::Int(id),
            TypedValue::List(vec![TypedValue::Text("a".into())]),
            TypedValue::HugeInt(i128::from(id) << 70),
        ]
    }

    #[test]
    fn ndjson_lines_are_keyed_and_independent() {
        let mut rs = ResultSet::materialized(columns(), vec![row(1), row(2)]);
        let body = ResponseFormatter::default().ndjson(&mut rs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        for (idx, line) in lines.iter().enumerate() {
            let doc: Value = serde_json::from_str(line).unwrap();
            assert_eq!(doc["id"], json!(idx as i64 + 1));
            assert_eq!(doc["tags"], json!(["a"]));
            assert!(doc["big"].is_string());
        }
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn ndjson_keeps_rows_before_a_failure() {
        let cols = vec![ColumnSchema::new("v", DeclaredType::BigInt)];
        let rows = vec![
            vec![TypedValue::Int(1)],
            vec![TypedValue::Int(2)],
            vec![TypedValue::Text("oops".into())],
            vec![TypedValue::Int(4)],
        ];
        let mut rs = ResultSet::materialized(cols, rows);
        let mut emitted = Vec::new();
        let err = ResponseFormatter::default()
            .write_ndjson(&mut rs, |line| {
                emitted.push(line);
                true
            })
            .unwrap_err();
        assert_eq!(err.kind(), flock_api::ErrorKind::Serialization);
        assert_eq!(emitted, vec!["{\"v\":1}\n".to_string(), "{\"v\":2}\n".to_string()]);
        assert_eq!(rs.rows_read(), 3);
    }

    #[test]
    fn ndjson_stops_when_reader_is_gone() {
        let mut rs = ResultSet::materialized(columns(), vec![row(1), row(2), row(3)]);
        let lines = ResponseFormatter::default()
            .write_ndjson(&mut rs, |_| false)
            .unwrap();
        assert_eq!(lines, 0);
        assert_eq!(rs.rows_read(), 1);
    }

    #[test]
    fn compact_document_shape() {
        let mut rs = ResultSet::materialized(columns(), vec![row(1), row(2)]);
        let body = ResponseFormatter::default()
            .compact(&mut rs, Duration::from_millis(1500))
            .unwrap();
        let doc: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(
            doc["meta"],
            json!([
                {"name": "id", "type": "Int64"},
                {"name": "tags", "type": "Array(String)"},
                {"name": "big", "type": "Int128"}
            ])
        );
        assert_eq!(doc["rows"], json!(2));
        assert_eq!(doc["data"][0][0], json!(1));
        assert_eq!(doc["data"][1][1], json!(["a"]));
        for cells in doc["data"].as_array().unwrap() {
            assert_eq!(cells.as_array().unwrap().len(), doc["meta"].as_array().unwrap().len());
        }
        assert!(doc["statistics"]["elapsed"].as_f64().unwrap() >= 1.5);
        assert_eq!(doc["statistics"]["rows_read"], json!(2));
        assert!(body.starts_with(r#"{"meta":"#));
    }

    #[test]
    fn compact_elapsed_covers_row_drain() {
        let cols = vec![ColumnSchema::new("n", DeclaredType::BigInt)];
        let mut left = 3;
        let slow = std::iter::from_fn(move || {
            if left == 0 {
                return None;
            }
            left -= 1;
            std::thread::sleep(Duration::from_millis(20));
            Some(Ok(vec![TypedValue::Int(left)]))
        });
        let mut rs = ResultSet::new(cols, slow);
        let body = ResponseFormatter::default().compact(&mut rs, Duration::ZERO).unwrap();
        let doc: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["rows"], json!(3));
        assert!(doc["statistics"]["elapsed"].as_f64().unwrap() >= 0.06);
    }

    #[test]
    fn compact_fails_as_a_whole() {
        let cols = vec![ColumnSchema::new("v", DeclaredType::Unsupported("POINTER".into()))];
        let mut rs = ResultSet::materialized(cols, vec![vec![TypedValue::Null], vec![TypedValue::Int(1)]]);
        assert!(ResponseFormatter::default().compact(&mut rs, Duration::ZERO).is_err());

        let cols = vec![ColumnSchema::new("v", DeclaredType::Unsupported("POINTER".into()))];
        let mut rs = ResultSet::materialized(cols, vec![vec![TypedValue::Int(1)]]);
        let lenient = ResponseFormatter::new(EncodingPolicy {
            coerce_invalid_to_null: true,
        });
        let body = lenient.compact(&mut rs, Duration::ZERO).unwrap();
        let doc: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["data"], json!([[null]]));
    }

    #[test]
    fn empty_result_has_meta_and_no_rows() {
        let mut rs = ResultSet::materialized(columns(), Vec::new());
        let body = ResponseFormatter::default().compact(&mut rs, Duration::ZERO).unwrap();
        let doc: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["rows"], json!(0));
        assert_eq!(doc["data"], json!([]));
        assert_eq!(doc["meta"].as_array().unwrap().len(), 3);
    }
}
