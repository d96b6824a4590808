use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};

use flock_api::{OutputFormat, QueryError, ResultSet};
use flock_engine::{EngineError, PeerData, PeerRecord, PeerRegistry};

use super::AppState;
use crate::handler::{error_response, query_params, worker_failed};
use crate::request;

const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Deserialize)]
struct Announcement {
    name: String,
    endpoint: String,
    #[serde(default = "default_ttl")]
    ttl: i64,
    #[serde(default)]
    metadata: Option<Value>,
}

fn default_ttl() -> i64 {
    DEFAULT_TTL_SECS
}

impl Announcement {
    fn into_peer(self, source: SocketAddr) -> PeerData {
        let metadata = match self.metadata {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        PeerData {
            name: self.name,
            endpoint: self.endpoint,
            source_address: source.ip().to_string(),
            ttl: self.ttl,
            metadata,
        }
    }
}

fn registry_error(e: EngineError) -> QueryError {
    match e {
        EngineError::Query(e) => e,
        other => QueryError::execution(other.to_string()),
    }
}

fn registry(state: &AppState) -> Result<PeerRegistry, QueryError> {
    state
        .peers
        .clone()
        .ok_or_else(|| QueryError::internal("peer registry is disabled"))
}

/// Run a registry call on the blocking pool.
async fn blocking<T, F>(peers: PeerRegistry, f: F) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: FnOnce(&PeerRegistry) -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&peers))
        .await
        .map_err(worker_failed)?
        .map_err(registry_error)
}

fn respond(result: Result<Response, QueryError>) -> Response {
    result.unwrap_or_else(error_response)
}

fn found(hit: bool) -> Response {
    if hit {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "Peer not found",
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════
//  /discovery/{hash}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn register(
    State(state): State<AppState>,
    ConnectInfo(source): ConnectInfo<SocketAddr>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    respond(serve_register(state, source, hash, &headers, &body).await)
}

async fn serve_register(
    state: AppState,
    source: SocketAddr,
    hash: String,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, QueryError> {
    state.auth.check(headers)?;
    let announcement: Announcement = serde_json::from_slice(body)
        .map_err(|e| QueryError::request_format(format!("Invalid peer announcement: {e}")))?;
    let peer = announcement.into_peer(source);
    let peer_id = blocking(registry(&state)?, move |r| r.register(&hash, &peer)).await?;
    Ok(Json(json!({ "peer_id": peer_id })).into_response())
}

pub(crate) async fn list(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    respond(serve_list(state, hash, &uri, &headers).await)
}

async fn serve_list(
    state: AppState,
    hash: String,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Response, QueryError> {
    state.auth.check(headers)?;
    let params = query_params(uri)?;
    let format = request::simple_format(headers, &params)?;

    let started = Instant::now();
    let peers = blocking(registry(&state)?, move |r| r.list(&hash)).await?;
    let elapsed = started.elapsed();

    let rows = peers.into_iter().map(PeerRecord::into_row).collect();
    let mut rs = ResultSet::materialized(PeerRecord::columns(), rows);
    let body = match format {
        OutputFormat::Json => state.formatter.compact(&mut rs, elapsed)?,
        OutputFormat::Ndjson => state.formatter.ndjson(&mut rs)?,
    };
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  /discovery/{hash}/{peer_id}[/heartbeat]
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn remove(
    State(state): State<AppState>,
    Path((hash, peer_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    respond(touch(state, &headers, move |r| r.remove(&hash, &peer_id)).await)
}

pub(crate) async fn heartbeat(
    State(state): State<AppState>,
    Path((hash, peer_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    respond(touch(state, &headers, move |r| r.heartbeat(&hash, &peer_id)).await)
}

/// Authenticate, then run a single-peer operation answering 204 or 404.
async fn touch<F>(state: AppState, headers: &HeaderMap, f: F) -> Result<Response, QueryError>
where
    F: FnOnce(&PeerRegistry) -> Result<bool, EngineError> + Send + 'static,
{
    state.auth.check(headers)?;
    let hit = blocking(registry(&state)?, f).await?;
    Ok(found(hit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SocketAddr {
        "10.0.0.7:41000".parse().unwrap()
    }

    #[test]
    fn announcement_defaults() {
        let a: Announcement = serde_json::from_str(r#"{"name":"n","endpoint":"e"}"#).unwrap();
        let peer = a.into_peer(source());
        assert_eq!(peer.ttl, DEFAULT_TTL_SECS);
        assert_eq!(peer.metadata, "");
        assert_eq!(peer.source_address, "10.0.0.7");
    }

    #[test]
    fn metadata_keeps_strings_and_serializes_the_rest() {
        let a: Announcement =
            serde_json::from_str(r#"{"name":"n","endpoint":"e","metadata":"raw"}"#).unwrap();
        assert_eq!(a.into_peer(source()).metadata, "raw");

        let a: Announcement =
            serde_json::from_str(r#"{"name":"n","endpoint":"e","ttl":5,"metadata":{"v":1}}"#)
                .unwrap();
        let peer = a.into_peer(source());
        assert_eq!(peer.metadata, r#"{"v":1}"#);
        assert_eq!(peer.ttl, 5);
    }

    #[test]
    fn announcement_requires_name_and_endpoint() {
        assert!(serde_json::from_str::<Announcement>(r#"{"name":"n"}"#).is_err());
        assert!(serde_json::from_str::<Announcement>(r#"{"endpoint":"e"}"#).is_err());
    }
}
