use crate::error::QueryError;
use crate::schema::ColumnSchema;
use crate::value::TypedValue;

/// Positional array of values. Order matches `ResultSet::columns`.
pub type Row = Vec<TypedValue>;

/// Forward-only result of one statement.
///
/// Rows are pulled lazily from the engine; the set cannot be rewound.
/// `rows_read`/`bytes_read` grow as rows are pulled and are final once the
/// iterator is exhausted.
pub struct ResultSet<'a> {
    columns: Vec<ColumnSchema>,
    rows: Box<dyn Iterator<Item = Result<Row, QueryError>> + 'a>,
    rows_read: u64,
    bytes_read: u64,
}

impl<'a> ResultSet<'a> {
    pub fn new(
        columns: Vec<ColumnSchema>,
        rows: impl Iterator<Item = Result<Row, QueryError>> + 'a,
    ) -> Self {
        Self {
            columns,
            rows: Box::new(rows),
            rows_read: 0,
            bytes_read: 0,
        }
    }

    /// Result set over rows that are already in memory.
    pub fn materialized(columns: Vec<ColumnSchema>, rows: Vec<Row>) -> Self {
        Self::new(columns, rows.into_iter().map(Ok))
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl Iterator for ResultSet<'_> {
    type Item = Result<Row, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.rows.next()?;
        if let Ok(row) = &next {
            self.rows_read += 1;
            self.bytes_read += row.iter().map(TypedValue::byte_size).sum::<u64>();
        }
        Some(next)
    }
}
