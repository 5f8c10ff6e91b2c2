//! Error types for the relay and the upload client.

use crate::peer::PeerId;
use std::path::PathBuf;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use websim_symbols::SymbolError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("file does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to get breakpoints: {0}")]
    Symbols(#[from] SymbolError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("peer {0} is no longer connected")]
    PeerGone(PeerId),
}

pub type Result<T> = std::result::Result<T, RelayError>;
