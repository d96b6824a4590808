use flock_api::{Parameters, QueryError, ResultSet};

/// Consumer of a result set. Runs while the statement is still alive,
/// so the result never outlives the session that produced it.
pub type Consume<'c> = dyn FnMut(&mut ResultSet<'_>) -> Result<(), QueryError> + 'c;

/// Query engine capability.
///
/// Shared process-wide; every request opens its own session.
pub trait QueryEngine: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn Session>, QueryError>;
}

/// One engine connection, owned by a single request.
pub trait Session {
    /// Execute `sql` directly.
    ///
    /// `consume` is invoked once the statement has produced its first row
    /// (or finished, for statements without rows).
    fn query(&mut self, sql: &str, consume: &mut Consume<'_>) -> Result<(), QueryError>;

    /// Prepare `sql`, bind `parameters` by name, then execute it.
    fn query_prepared(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        consume: &mut Consume<'_>,
    ) -> Result<(), QueryError>;
}
