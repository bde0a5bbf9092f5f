//! Query and status handlers.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Json;
use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::api::server::AppState;

/// Evaluate the raw query string against the current snapshot.
///
/// The whole (percent-decoded) query string is the range expression:
/// `GET /?%25web` asks for `%web`. Results come back one per line;
/// query errors are 422 with the error message as the body.
pub async fn query(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    RawQuery(raw): RawQuery,
) -> Response {
    let started = Instant::now();
    let raw = raw.unwrap_or_default();

    // '+' means space in a query string; literal pluses arrive as %2B
    // and are restored by the percent decode below.
    let unescaped = raw.replace('+', " ");
    let Ok(text) = percent_decode_str(&unescaped).decode_utf8() else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("could not unescape: {raw}\n"),
        )
            .into_response();
    };

    // Logged before evaluation so a crashing query is still visible.
    debug!(remote = %addr, query = %text, "PREQUERY");
    state.metrics.increment("query");

    let snapshot = state.snapshot.load();
    let response = match snapshot.query(&text) {
        Ok(results) => {
            let mut body = String::new();
            for result in results {
                body.push_str(&result);
                body.push('\n');
            }
            (StatusCode::OK, body).into_response()
        }
        Err(err) => (StatusCode::UNPROCESSABLE_ENTITY, format!("{err}\n")).into_response(),
    };

    info!(
        remote = %addr,
        secs = started.elapsed().as_secs_f64(),
        query = %text,
        "QUERY"
    );
    response
}

/// Liveness endpoint.
pub async fn status() -> Json<Value> {
    debug!("STATUS /_status");
    Json(json!({ "status": "ok" }))
}
