use std::fmt;

/// Stage of the request pipeline an error belongs to.
///
/// The HTTP layer maps each kind to exactly one status code; nothing
/// below it knows about HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or wrong credentials.
    Auth,
    /// Malformed request envelope: bad JSON shape, unknown format token,
    /// unsupported parameter type.
    RequestFormat,
    /// The engine rejected the statement, a binding failed, or execution failed.
    Execution,
    /// A value could not be rendered into the JSON tree.
    Serialization,
    /// Anything else (lost worker, broken invariant).
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Auth => f.write_str("auth"),
            ErrorKind::RequestFormat => f.write_str("request_format"),
            ErrorKind::Execution => f.write_str("execution"),
            ErrorKind::Serialization => f.write_str("serialization"),
            ErrorKind::Internal => f.write_str("internal"),
        }
    }
}

/// Error carried up the query pipeline.
///
/// Carries an `ErrorKind` for the status mapping and a human-readable
/// message. Execution messages are the engine's own text, untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct QueryError {
    kind: ErrorKind,
    message: String,
}

impl QueryError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, msg)
    }

    pub fn request_format(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestFormat, msg)
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, msg)
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with `ctx`, keeping the kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for QueryError {}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
