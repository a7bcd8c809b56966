//! HTTP routes of the sync server.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/sync/mutations/{dbname}` | Mutations since a cursor or timestamp |
//! | `GET` | `/ping/{dbname}` | Liveness check |
//!
//! Client authentication happens upstream. The authenticating proxy passes
//! the signed-in user in [`USER_HEADER`]; requests without it are anonymous.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use treesync_protocol::MutationsRequest;
use treesync_server::{EndpointResponse, Identity, SyncServer};

use crate::error::CliError;

/// Header carrying the identity established by the upstream proxy.
pub const USER_HEADER: &str = "x-treesync-user";

/// Application state shared across all handlers.
pub type AppState = Arc<SyncServer>;

/// Creates the router for one database.
pub fn router(server: AppState) -> Router {
    Router::new()
        .route("/sync/mutations/{dbname}", get(get_mutations))
        .route("/ping/{dbname}", get(ping))
        .with_state(server)
}

/// Parses an identity string.
///
/// `admin` and `anonymous` name the special identities; anything else is a
/// user id, optionally written as `user:<uid>`.
///
/// A uid must be usable as a single path segment, so the wildcard `*`, a
/// `$`-prefixed variable name and `/` are rejected.
pub fn parse_identity(raw: &str) -> Result<Identity, CliError> {
    let raw = raw.trim();
    match raw {
        "admin" => return Ok(Identity::Admin),
        "anonymous" => return Ok(Identity::Anonymous),
        _ => {}
    }
    let uid = raw.strip_prefix("user:").unwrap_or(raw);
    if uid.is_empty()
        || uid == "*"
        || uid.starts_with('$')
        || uid
            .chars()
            .any(|c| c == '/' || c.is_whitespace() || c.is_control())
    {
        return Err(CliError::InvalidIdentity(raw.to_string()));
    }
    Ok(Identity::user(uid))
}

/// Resolves the identity of a request.
///
/// `None` means the header was present but unusable.
fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let Some(value) = headers.get(USER_HEADER) else {
        return Some(Identity::Anonymous);
    };
    let parsed = value
        .to_str()
        .map_err(|_| CliError::InvalidIdentity("<non-ascii>".into()))
        .and_then(parse_identity);
    match parsed {
        Ok(identity) => Some(identity),
        Err(e) => {
            debug!(error = %e, "ignoring identity header");
            None
        }
    }
}

/// Error body for failures outside the mutations endpoint.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

fn unknown_database(dbname: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            code: "not_found",
            message: format!("database {dbname} not found"),
        }),
    )
        .into_response()
}

fn into_http(response: EndpointResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, Json(response.body)).into_response();
    for (name, value) in response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                http.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "dropping unrepresentable response header"),
        }
    }
    http
}

/// `GET /sync/mutations/{dbname}` - mutations feed.
async fn get_mutations(
    State(server): State<AppState>,
    Path(dbname): Path<String>,
    headers: HeaderMap,
    query: Result<Query<MutationsRequest>, QueryRejection>,
) -> Response {
    if dbname != server.db_name() {
        return unknown_database(&dbname);
    }
    let Query(request) = match query {
        Ok(query) => query,
        Err(rejection) => return into_http(server.reject_malformed(&rejection.body_text())),
    };
    let identity = identity_from_headers(&headers);
    into_http(server.handle(identity.as_ref(), &request).await)
}

/// `GET /ping/{dbname}` - liveness check.
async fn ping(State(server): State<AppState>, Path(dbname): Path<String>) -> Response {
    if dbname != server.db_name() {
        return unknown_database(&dbname);
    }
    "pong".into_response()
}
