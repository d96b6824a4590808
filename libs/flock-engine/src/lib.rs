pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod executor;
pub mod sqlite;

pub use config::{DiscoveryConfig, FlockConfig};
pub use discovery::{PeerData, PeerRecord, PeerRegistry};
pub use engine::{QueryEngine, Session};
pub use error::EngineError;
pub use executor::QueryExecutor;
pub use sqlite::SqliteEngine;
