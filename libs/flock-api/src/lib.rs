pub mod error;
pub mod query;
pub mod result;
pub mod schema;
pub mod value;

pub use error::{ErrorKind, QueryError};
pub use query::{BoundValue, EncodingPolicy, NormalizedQuery, OutputFormat, Parameters};
pub use result::{ResultSet, Row};
pub use schema::{ColumnSchema, DeclaredType};
pub use value::TypedValue;
