use std::sync::Arc;

use rusqlite::params;
use sha2::{Digest, Sha256};

use flock_api::{ColumnSchema, DeclaredType, Row, TypedValue};

use crate::error::EngineError;
use crate::sqlite::SqliteEngine;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS peers (
    hash VARCHAR NOT NULL,
    peer_id VARCHAR NOT NULL,
    name VARCHAR,
    endpoint VARCHAR,
    source_address VARCHAR,
    ttl BIGINT,
    metadata VARCHAR,
    registered_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (hash, peer_id)
);
CREATE INDEX IF NOT EXISTS idx_peers_ttl ON peers (registered_at, ttl);
";

/// Peer announcement as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerData {
    pub name: String,
    pub endpoint: String,
    pub source_address: String,
    /// Seconds the registration stays valid without a heartbeat.
    pub ttl: i64,
    pub metadata: String,
}

/// Stored peer, as listed back to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub endpoint: String,
    pub source_address: String,
    pub peer_id: String,
    pub metadata: String,
    pub ttl: i64,
    pub registered_at: String,
}

impl PeerRecord {
    /// Output columns of a peer listing.
    pub fn columns() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("name", DeclaredType::Varchar),
            ColumnSchema::new("endpoint", DeclaredType::Varchar),
            ColumnSchema::new("sourceAddress", DeclaredType::Varchar),
            ColumnSchema::new("peerId", DeclaredType::Varchar),
            ColumnSchema::new("metadata", DeclaredType::Varchar),
            ColumnSchema::new("ttl", DeclaredType::BigInt),
            ColumnSchema::new("registered_at", DeclaredType::Varchar),
        ]
    }

    pub fn into_row(self) -> Row {
        vec![
            TypedValue::Text(self.name),
            TypedValue::Text(self.endpoint),
            TypedValue::Text(self.source_address),
            TypedValue::Text(self.peer_id),
            TypedValue::Text(self.metadata),
            TypedValue::Int(self.ttl),
            TypedValue::Text(self.registered_at),
        ]
    }
}

/// Deterministic peer id: hex of the first 16 bytes of `sha256("name:endpoint")`.
pub fn peer_id(name: &str, endpoint: &str) -> String {
    let digest = Sha256::digest(format!("{name}:{endpoint}").as_bytes());
    hex::encode(&digest[..16])
}

/// Peer registry stored in the engine's database.
///
/// Peers are grouped by an opaque `hash` chosen by clients and expire when
/// `now - registered_at >= ttl`.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    engine: Arc<SqliteEngine>,
}

impl PeerRegistry {
    /// Create the backing table if needed.
    pub fn new(engine: Arc<SqliteEngine>) -> Result<Self, EngineError> {
        engine.execute_batch(SCHEMA)?;
        Ok(Self { engine })
    }

    /// Insert or refresh a peer; returns its id.
    pub fn register(&self, hash: &str, peer: &PeerData) -> Result<String, EngineError> {
        let id = peer_id(&peer.name, &peer.endpoint);
        let conn = self.engine.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO peers
                (hash, peer_id, name, endpoint, source_address, ttl, metadata, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)",
            params![
                hash,
                id,
                peer.name,
                peer.endpoint,
                peer.source_address,
                peer.ttl,
                peer.metadata
            ],
        )?;
        tracing::info!(hash = %hash, peer_id = %id, name = %peer.name, "registered peer");
        Ok(id)
    }

    pub fn list(&self, hash: &str) -> Result<Vec<PeerRecord>, EngineError> {
        let conn = self.engine.connect()?;
        let mut stmt = conn.prepare(
            "SELECT name, endpoint, source_address, peer_id, metadata, ttl,
                    strftime('%Y-%m-%d %H:%M:%S', registered_at)
             FROM peers WHERE hash = ?1
             ORDER BY registered_at, peer_id",
        )?;
        let peers = stmt
            .query_map([hash], |row| {
                Ok(PeerRecord {
                    name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    endpoint: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    source_address: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    peer_id: row.get(3)?,
                    metadata: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    ttl: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
                    registered_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(peers)
    }

    /// Returns `false` when no such peer exists.
    pub fn remove(&self, hash: &str, peer_id: &str) -> Result<bool, EngineError> {
        let conn = self.engine.connect()?;
        let deleted = conn.execute(
            "DELETE FROM peers WHERE hash = ?1 AND peer_id = ?2",
            [hash, peer_id],
        )?;
        if deleted > 0 {
            tracing::info!(hash = %hash, peer_id = %peer_id, "removed peer");
        }
        Ok(deleted > 0)
    }

    /// Restart the peer's TTL window. Returns `false` when no such peer exists.
    pub fn heartbeat(&self, hash: &str, peer_id: &str) -> Result<bool, EngineError> {
        let conn = self.engine.connect()?;
        let updated = conn.execute(
            "UPDATE peers SET registered_at = CURRENT_TIMESTAMP WHERE hash = ?1 AND peer_id = ?2",
            [hash, peer_id],
        )?;
        Ok(updated > 0)
    }

    /// Delete every expired registration; returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize, EngineError> {
        let conn = self.engine.connect()?;
        let removed = conn.execute(
            "DELETE FROM peers
             WHERE CAST(strftime('%s', 'now') AS INTEGER)
                 - CAST(strftime('%s', registered_at) AS INTEGER) >= ttl",
            [],
        )?;
        tracing::debug!(removed, "peer expiry sweep");
        Ok(removed)
    }
}
