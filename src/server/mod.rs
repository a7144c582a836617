//! Viewer-facing web server.
//!
//! Routes:
//! - `GET /stream.mjpeg` - live multipart stream, one sink per connection
//! - `GET /status`       - fused alarm and vitals as JSON
//! - `GET /ping`         - liveness probe

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use tokio::net::TcpListener;

use crate::app::AppContext;
use crate::error::{MonitorError, Result};
use crate::fusion::StatusReport;
use crate::streaming::ViewerFeed;

pub const STREAM_PATH: &str = "/stream.mjpeg";
pub const STATUS_PATH: &str = "/status";
pub const PING_PATH: &str = "/ping";

/// Create the web router
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route(STREAM_PATH, get(stream))
        .route(STATUS_PATH, get(status))
        .route(PING_PATH, get(ping))
        .with_state(ctx)
}

/// Bind `bind:port`, or `bind:fallback` if that fails. No further retries.
pub async fn bind_with_fallback(bind: &str, port: u16, fallback: u16) -> Result<TcpListener> {
    let primary = format!("{}:{}", bind, port);
    match TcpListener::bind(&primary).await {
        Ok(listener) => {
            tracing::info!(addr = %primary, "Started webserver");
            Ok(listener)
        }
        Err(e) => {
            let backup = format!("{}:{}", bind, fallback);
            tracing::warn!(
                addr = %primary,
                error = %e,
                fallback = %backup,
                "Cannot listen, trying fallback port"
            );
            let listener = TcpListener::bind(&backup)
                .await
                .map_err(|source| MonitorError::Bind {
                    addr: primary,
                    fallback: backup.clone(),
                    source,
                })?;
            tracing::info!(addr = %backup, "Started webserver");
            Ok(listener)
        }
    }
}

/// Serve viewers until the listener fails.
pub async fn run_server(listener: TcpListener, ctx: AppContext) -> Result<()> {
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

/// Multipart stream: the response body is every segment the viewer's sink
/// receives, raw, until the viewer goes away.
async fn stream(State(ctx): State<AppContext>) -> Result<Response> {
    let feed = ctx.distributor.connect()?;
    tracing::info!(viewer = feed.id(), "Getting new client of image stream");

    let content_type = format!("multipart/x-mixed-replace; boundary=--{}", ctx.config.boundary);
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(viewer_stream(feed)),
    )
        .into_response())
}

/// Body stream over one viewer's sink.
///
/// The connection polls for the next chunk only once the previous one has
/// been accepted by the transport, which is when a congested sink may
/// resume. Dropping the stream (viewer gone) drops the feed, which
/// unregisters the sink.
pub fn viewer_stream(
    feed: ViewerFeed,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(feed, |mut feed| async move {
        feed.written();
        let segment = feed.recv().await?;
        Some((Ok(segment), feed))
    })
}

async fn status(State(ctx): State<AppContext>) -> Json<StatusReport> {
    let motion = *ctx.motion.borrow();
    let report = StatusReport::new(&motion, &ctx.vitals.borrow());
    Json(report)
}

async fn ping() -> impl IntoResponse {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(json!({ "status": "ready" })),
    )
}
