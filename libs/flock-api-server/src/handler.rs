use std::collections::HashMap;
use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{self, HeaderValue};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use tokio::sync::{mpsc, oneshot};

use flock_api::{ErrorKind, NormalizedQuery, OutputFormat, QueryError};

use super::AppState;
use crate::request;

/// Prefix of 500 bodies for failures that are not engine errors.
pub(crate) const DIAGNOSTIC_PREFIX: &str = "Code: 59, e.displayText() = DB::Exception: ";

const PLAYGROUND: &str = include_str!("playground.html");

// ═══════════════════════════════════════════════════════════════
//  Plumbing: CORS, errors, health
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS, PUT"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

pub(crate) async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub(crate) async fn ping() -> &'static str {
    "OK"
}

/// The single place where pipeline errors become HTTP responses.
pub(crate) fn error_response(err: QueryError) -> Response {
    let (status, body) = match err.kind() {
        ErrorKind::Auth => (StatusCode::UNAUTHORIZED, err.message().to_string()),
        ErrorKind::RequestFormat => (StatusCode::BAD_REQUEST, err.message().to_string()),
        ErrorKind::Execution => (StatusCode::INTERNAL_SERVER_ERROR, err.message().to_string()),
        ErrorKind::Serialization | ErrorKind::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{DIAGNOSTIC_PREFIX}{}", err.message()),
        ),
    };
    tracing::warn!(
        status = status.as_u16(),
        kind = %err.kind(),
        error = %err.message(),
        "request failed"
    );
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

pub(crate) fn query_params(uri: &Uri) -> Result<HashMap<String, String>, QueryError> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .map_err(|e| QueryError::request_format(e.body_text()))
}

pub(crate) fn worker_failed(e: tokio::task::JoinError) -> QueryError {
    QueryError::internal(format!("query worker failed: {e}"))
}

// ═══════════════════════════════════════════════════════════════
//  GET|POST <base_path>
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn query(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match serve_query(state, &method, &uri, &headers, &body).await {
        Ok(response) => response,
        Err(err) => error_response(err),
    }
}

async fn serve_query(
    state: AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, QueryError> {
    state.auth.check(headers)?;

    let params = query_params(uri)?;
    let Some(query) = request::normalize(method, headers, &params, body)? else {
        return Ok(Html(PLAYGROUND).into_response());
    };

    match query.format {
        OutputFormat::Json => compact(state, query).await,
        OutputFormat::Ndjson => ndjson(state, query).await,
    }
}

async fn compact(state: AppState, query: NormalizedQuery) -> Result<Response, QueryError> {
    let AppState {
        executor,
        formatter,
        ..
    } = state;
    let body = tokio::task::spawn_blocking(move || {
        executor.run(&query.sql, query.bindings(), |rs, elapsed| {
            let body = formatter.compact(rs, elapsed)?;
            tracing::debug!(
                format = "JSONCompact",
                elapsed_ms = elapsed.as_millis() as u64,
                rows = rs.rows_read(),
                "query served"
            );
            Ok(body)
        })
    })
    .await
    .map_err(worker_failed)??;

    Ok((
        [(header::CONTENT_TYPE, OutputFormat::Json.content_type())],
        body,
    )
        .into_response())
}

/// Stream NDJSON lines from the blocking worker to the socket.
///
/// The status line is committed only once the first row has been encoded,
/// so an error up to that point still becomes a proper error response.
/// A later error ends the body early but cleanly: the channel is closed, so
/// the chunked body terminates after the lines already committed.
async fn ndjson(state: AppState, query: NormalizedQuery) -> Result<Response, QueryError> {
    let AppState {
        executor,
        formatter,
        stream_buffer,
        ..
    } = state;
    let (head_tx, head_rx) = oneshot::channel::<Result<(), QueryError>>();
    let (line_tx, line_rx) = mpsc::channel::<String>(stream_buffer);

    tokio::task::spawn_blocking(move || {
        let mut head_tx = Some(head_tx);
        let outcome = executor.run(&query.sql, query.bindings(), |rs, elapsed| {
            let lines = formatter.write_ndjson(rs, |line| {
                if let Some(tx) = head_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                line_tx.blocking_send(line).is_ok()
            })?;
            tracing::debug!(
                format = "JSONEachRow",
                elapsed_ms = elapsed.as_millis() as u64,
                rows = lines,
                "query served"
            );
            Ok(())
        });

        match (outcome, head_tx.take()) {
            (Ok(()), Some(tx)) => {
                let _ = tx.send(Ok(()));
            }
            (Ok(()), None) => {}
            (Err(err), Some(tx)) => {
                let _ = tx.send(Err(err));
            }
            (Err(err), None) => {
                tracing::warn!(
                    kind = %err.kind(),
                    error = %err.message(),
                    "ndjson stream truncated after partial output"
                );
            }
        }
    });

    match head_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(_) => return Err(QueryError::internal("query worker exited without a response")),
    }

    let stream = futures::stream::unfold(line_rx, |mut rx| async move {
        rx.recv().await.map(|line| (Ok::<_, Infallible>(line), rx))
    });
    Ok((
        [(header::CONTENT_TYPE, OutputFormat::Ndjson.content_type())],
        Body::from_stream(stream),
    )
        .into_response())
}
