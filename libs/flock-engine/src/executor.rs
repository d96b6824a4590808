use std::sync::Arc;
use std::time::{Duration, Instant};

use flock_api::{Parameters, QueryError, ResultSet};

use crate::engine::QueryEngine;

/// Runs one statement per call on a fresh engine session.
///
/// Parameters, when present and non-empty, go through prepare + bind;
/// otherwise the SQL is executed directly.
#[derive(Clone)]
pub struct QueryExecutor {
    engine: Arc<dyn QueryEngine>,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor").finish_non_exhaustive()
    }
}

impl QueryExecutor {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self { engine }
    }

    /// Execute `sql` and hand the result set to `f` together with the time
    /// the engine spent executing (up to the first row). Rows are pulled
    /// inside `f`, so callers reporting total time add their own drain time.
    ///
    /// The result set is only valid inside `f`.
    pub fn run<T>(
        &self,
        sql: &str,
        parameters: Option<&Parameters>,
        f: impl FnOnce(&mut ResultSet<'_>, Duration) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        if sql.trim().is_empty() {
            return Err(QueryError::execution("No statement to execute"));
        }

        let mut session = self.engine.open_session()?;
        let started = Instant::now();
        let mut f = Some(f);
        let mut output = None;
        let mut consume = |rs: &mut ResultSet<'_>| -> Result<(), QueryError> {
            let elapsed = started.elapsed();
            let f = f
                .take()
                .ok_or_else(|| QueryError::internal("result set delivered twice"))?;
            output = Some(f(rs, elapsed)?);
            Ok(())
        };

        match parameters.filter(|p| !p.is_empty()) {
            Some(params) => {
                tracing::trace!(parameters = params.len(), "executing prepared statement");
                session.query_prepared(sql, params, &mut consume)?
            }
            None => session.query(sql, &mut consume)?,
        }

        output.ok_or_else(|| QueryError::internal("engine finished without a result set"))
    }
}
