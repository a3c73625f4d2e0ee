use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use crossbeam_channel::Sender;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{events::RawEvent, protocol::parse_value};

pub fn is_valid_bind(value: &str) -> bool {
    value.parse::<SocketAddr>().is_ok()
}

/// Local HTTP side door into the event pipeline. Accepts the same JSON
/// envelopes as the websocket feed, one object or an array of them.
pub async fn run_ingest_server(bind: &str, tx: Sender<RawEvent>) -> Result<()> {
    let app = Router::new()
        .route(
            "/ingest",
            post(move |payload: Json<Value>| {
                let tx = tx.clone();
                async move { ingest_payload(payload, tx) }
            }),
        )
        .route("/health", get(|| async { "ok" }));

    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid ingest bind address: {bind}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed binding ingest listener on {addr}"))?;

    info!("http ingest available at http://{addr}/ingest");
    axum::serve(listener, app)
        .await
        .context("axum serve failed")?;
    Ok(())
}

fn ingest_payload(Json(payload): Json<Value>, tx: Sender<RawEvent>) -> StatusCode {
    let values = match payload {
        Value::Array(values) => values,
        value => vec![value],
    };
    let mut events = Vec::with_capacity(values.len());
    for value in values {
        match parse_value(value) {
            Ok(event) => events.push(event),
            Err(err) => {
                warn!(%err, "rejecting ingest payload");
                return StatusCode::BAD_REQUEST;
            }
        }
    }
    for event in events {
        if tx.send(event).is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::ACCEPTED
}
