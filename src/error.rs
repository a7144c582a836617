use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to bind {addr} (fallback {fallback} also failed): {source}")]
    Bind {
        addr: String,
        fallback: String,
        source: io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Process { program: String, source: io::Error },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Log file {path} failed: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MonitorError::ChannelClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(error = %self, "Request failed");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
