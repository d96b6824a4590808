use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Rows, Statement};

use flock_api::{
    BoundValue, ColumnSchema, DeclaredType, Parameters, QueryError, ResultSet, Row, TypedValue,
};

use crate::engine::{Consume, QueryEngine, Session};
use crate::error::EngineError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

/// SQLite-backed engine.
///
/// Every session is a fresh connection. For `:memory:` the engine opens a
/// uniquely named shared-cache database and holds one keeper connection so
/// the data outlives individual sessions.
///
/// Shared-cache connections lock per table, and a conflicting lock fails at
/// once with `database table is locked` (SQLITE_LOCKED) instead of waiting
/// out the busy timeout. Concurrent reads are fine; a write racing another
/// session on the same table of a `:memory:` database may be rejected and
/// must be retried by the client. File databases wait on `BUSY_TIMEOUT`.
pub struct SqliteEngine {
    location: String,
    flags: OpenFlags,
    keeper: Option<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("location", &self.location)
            .field("memory", &self.keeper.is_some())
            .finish()
    }
}

impl SqliteEngine {
    /// Open `database`, a file path or `:memory:`.
    pub fn open(database: &str) -> Result<Self, EngineError> {
        let base = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        if database.is_empty() || database == ":memory:" {
            let id = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
            let engine = SqliteEngine {
                location: format!(
                    "file:flock-{}-{id}?mode=memory&cache=shared",
                    std::process::id()
                ),
                flags: base | OpenFlags::SQLITE_OPEN_URI,
                keeper: None,
            };
            let keeper = engine.connect()?;
            tracing::debug!(location = %engine.location, "opened in-memory database");
            return Ok(SqliteEngine {
                keeper: Some(Mutex::new(keeper)),
                ..engine
            });
        }

        let engine = SqliteEngine {
            location: database.to_string(),
            flags: base,
            keeper: None,
        };
        // Fail at startup rather than on the first request.
        engine.connect()?;
        tracing::debug!(location = %engine.location, "opened database file");
        Ok(engine)
    }

    /// Open a new connection to the same database.
    pub fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(&self.location, self.flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Run one or more statements without reading results.
    pub fn execute_batch(&self, sql: &str) -> Result<(), EngineError> {
        let conn = self.connect()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn is_memory(&self) -> bool {
        self.keeper.is_some()
    }
}

impl QueryEngine for SqliteEngine {
    fn open_session(&self) -> Result<Box<dyn Session>, QueryError> {
        let conn = self.connect().map_err(engine_error)?;
        Ok(Box::new(SqliteSession { conn }))
    }
}

struct SqliteSession {
    conn: Connection,
}

impl Session for SqliteSession {
    fn query(&mut self, sql: &str, consume: &mut Consume<'_>) -> Result<(), QueryError> {
        let mut stmt = self.conn.prepare(sql).map_err(engine_error)?;
        let declared = stmt.parameter_count();
        if declared > 0 {
            return Err(QueryError::execution(format!(
                "Statement declares {declared} parameter(s) but no values were provided"
            )));
        }
        let columns = describe_columns(&stmt);
        drive(stmt.raw_query(), columns, consume)
    }

    fn query_prepared(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        consume: &mut Consume<'_>,
    ) -> Result<(), QueryError> {
        let mut stmt = self.conn.prepare(sql).map_err(engine_error)?;
        bind_by_name(&mut stmt, parameters)?;
        let columns = describe_columns(&stmt);
        drive(stmt.raw_query(), columns, consume)
    }
}

fn engine_error(e: rusqlite::Error) -> QueryError {
    QueryError::execution(e.to_string())
}

/// Strip the SQLite parameter prefix and lower-case the rest.
fn parameter_key(raw: &str) -> String {
    raw.trim_start_matches([':', '$', '@', '?']).to_lowercase()
}

fn bind_by_name(stmt: &mut Statement<'_>, parameters: &Parameters) -> Result<(), QueryError> {
    let mut bound = HashSet::new();
    for idx in 1..=stmt.parameter_count() {
        let Some(raw) = stmt.parameter_name(idx).map(str::to_owned) else {
            return Err(QueryError::execution(format!(
                "Parameter at position {idx} has no name and cannot be bound"
            )));
        };
        let key = parameter_key(&raw);
        let Some(value) = parameters.get(&key) else {
            return Err(QueryError::execution(format!(
                "Values were not provided for the following prepared statement parameters: {key}"
            )));
        };
        let bound_value = match value {
            BoundValue::Text(text) => stmt.raw_bind_parameter(idx, text.as_str()),
            BoundValue::Boolean(flag) => stmt.raw_bind_parameter(idx, *flag),
        };
        bound_value.map_err(engine_error)?;
        bound.insert(key);
    }

    let unused: Vec<&str> = parameters
        .iter()
        .map(|(name, _)| name)
        .filter(|name| !bound.contains(*name))
        .collect();
    if !unused.is_empty() {
        tracing::debug!(unused = ?unused, "ignoring parameters the statement does not reference");
    }
    Ok(())
}

struct SqlColumn {
    name: String,
    declared: Option<DeclaredType>,
}

fn describe_columns(stmt: &Statement<'_>) -> Vec<SqlColumn> {
    stmt.columns()
        .into_iter()
        .map(|c| SqlColumn {
            name: c.name().to_string(),
            declared: c
                .decl_type()
                .filter(|decl| !decl.trim().is_empty())
                .map(DeclaredType::from_sql_name),
        })
        .collect()
}

/// Type of an undeclared column. SQLite stores each value with its own
/// storage class, so the column stays dynamic; the first row only decides
/// the reported name.
fn infer_type(first: Option<ValueRef<'_>>) -> DeclaredType {
    let reported = match first {
        Some(ValueRef::Integer(_)) => DeclaredType::BigInt,
        Some(ValueRef::Real(_)) => DeclaredType::Double,
        Some(ValueRef::Blob(_)) => DeclaredType::Blob,
        Some(ValueRef::Null | ValueRef::Text(_)) | None => DeclaredType::Varchar,
    };
    DeclaredType::Dynamic(Box::new(reported))
}

/// Step the statement once, settle the column types, then hand the
/// remaining rows to `consume` as a lazy result set.
fn drive(
    mut rows: Rows<'_>,
    columns: Vec<SqlColumn>,
    consume: &mut Consume<'_>,
) -> Result<(), QueryError> {
    let (types, pending) = match rows.next().map_err(engine_error)? {
        Some(row) => {
            let mut types = Vec::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let ty = match &column.declared {
                    Some(ty) => ty.clone(),
                    None => infer_type(Some(row.get_ref(idx).map_err(engine_error)?)),
                };
                types.push(ty);
            }
            let first = convert_row(row, &types)?;
            (types, Some(first))
        }
        None => {
            let types = columns
                .iter()
                .map(|c| c.declared.clone().unwrap_or_else(|| infer_type(None)))
                .collect();
            (types, None)
        }
    };

    let schema = columns
        .into_iter()
        .zip(&types)
        .map(|(column, ty)| ColumnSchema::new(column.name, ty.clone()))
        .collect();

    let mut result = ResultSet::new(
        schema,
        SqliteRows {
            rows,
            types,
            pending,
            done: false,
        },
    );
    consume(&mut result)
}

struct SqliteRows<'s> {
    rows: Rows<'s>,
    types: Vec<DeclaredType>,
    pending: Option<Row>,
    done: bool,
}

impl Iterator for SqliteRows<'_> {
    type Item = Result<Row, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.pending.take() {
            return Some(Ok(row));
        }
        if self.done {
            return None;
        }
        match self.rows.next() {
            Ok(Some(row)) => Some(convert_row(row, &self.types)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(engine_error(e)))
            }
        }
    }
}

fn convert_row(row: &rusqlite::Row<'_>, types: &[DeclaredType]) -> Result<Row, QueryError> {
    types
        .iter()
        .enumerate()
        .map(|(idx, ty)| {
            row.get_ref(idx)
                .map(|value| convert_value(value, ty))
                .map_err(engine_error)
        })
        .collect()
}

fn convert_value(value: ValueRef<'_>, ty: &DeclaredType) -> TypedValue {
    match value {
        ValueRef::Null => TypedValue::Null,
        ValueRef::Integer(v) => TypedValue::Int(v),
        ValueRef::Real(v) => TypedValue::Float(v),
        ValueRef::Text(bytes) => TypedValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => match (ty, uuid::Uuid::from_slice(bytes)) {
            (DeclaredType::Uuid, Ok(id)) => TypedValue::Text(id.hyphenated().to_string()),
            _ => TypedValue::Text(render_blob(bytes)),
        },
    }
}

/// Printable ASCII is kept as is; every other byte (and the backslash) is
/// written as `\xNN`.
fn render_blob(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'\\' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("\\x{b:02X}"));
        }
    }
    out
}
