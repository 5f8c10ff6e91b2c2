//! Uploader side of the protocol.
//!
//! The uploader opens a connection tagged `from=cli`, sends the optional
//! side-channel messages, then the firmware, and listens until the relay
//! closes the connection. Breakpoints for debug boards travel separately
//! over a second, short-lived connection.

use crate::error::{RelayError, Result};
use crate::protocol::{notice, ControlMessage, DebugInfo, CLI_QUERY};
use futures_util::{SinkExt, StreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use websim_symbols::{read_build_metadata, BreakpointExtractor};

/// Circuit definition looked up in the sketch directory.
pub const CIRCUIT_FILE: &str = "websim.json";

/// Boards whose name contains this marker run the legacy debug flow.
pub const DEBUG_BOARD_MARKER: &str = "_DBG";

/// How long the debug connection stays open after sending.
const DEBUG_LINGER: Duration = Duration::from_millis(500);

/// Returns true for board names that request breakpoint extraction.
pub fn is_debug_board(board: &str) -> bool {
    board.contains(DEBUG_BOARD_MARKER)
}

/// Builds the circuit side-channel message for a build artifact.
///
/// Returns `None` when there is no build metadata, no sketch location, no
/// `websim.json`, or the file cannot be read. None of these block an upload.
pub fn circuit_message(artifact: &Path) -> Option<(PathBuf, ControlMessage)> {
    let build_dir = artifact.parent()?;
    let sketch = read_build_metadata(build_dir).sketch_location();
    debug!("Sketch location: {:?}", sketch);

    let path = sketch?.join(CIRCUIT_FILE);
    let data = fs::read_to_string(&path)
        .map_err(|e| debug!("No circuit at {}: {}", path.display(), e))
        .ok()?;

    Some((path, ControlMessage::LoadCircuitJson { data }))
}

/// Summary of one firmware upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Size of the firmware image.
    pub bytes: usize,
    /// Circuit file sent ahead of the firmware, if any.
    pub circuit: Option<PathBuf>,
    /// The relay gave up waiting for a browser.
    pub timed_out: bool,
}

/// Connects to a local relay as the uploader.
#[derive(Debug, Clone)]
pub struct UploadClient {
    port: u16,
}

impl UploadClient {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn url(&self) -> String {
        format!("ws://localhost:{}/?{}", self.port, CLI_QUERY)
    }

    /// Sends a firmware file, optionally preceded by a board change.
    ///
    /// `on_reply` sees every text frame the relay sends back. The call returns
    /// once the relay closes the connection, or after it reports that no
    /// browser showed up.
    pub async fn send_file<F>(
        &self,
        path: &Path,
        board: Option<&str>,
        mut on_reply: F,
    ) -> Result<UploadReport>
    where
        F: FnMut(&str),
    {
        if !path.exists() {
            return Err(RelayError::FileNotFound(path.to_path_buf()));
        }
        let firmware = tokio::fs::read(path).await?;
        let bytes = firmware.len();
        debug!("Firmware head: {:?}", &firmware[..bytes.min(40)]);

        let (mut ws, _) = connect_async(self.url()).await?;

        if let Some(board) = board {
            let command = ControlMessage::ChangeBoard {
                board: board.to_string(),
            };
            ws.send(Message::Text(serde_json::to_string(&command)?))
                .await?;
            info!("Board changed to: {}", board);
        }

        let mut circuit = None;
        if let Some((source, message)) = circuit_message(path) {
            let sent = match serde_json::to_string(&message) {
                Ok(json) => ws.send(Message::Text(json)).await.is_ok(),
                Err(_) => false,
            };
            if sent {
                info!("Sent {} from: {}", CIRCUIT_FILE, source.display());
                circuit = Some(source);
            }
        }

        ws.send(Message::Binary(firmware)).await?;
        info!("Sent {} ({} bytes)", path.display(), bytes);

        let mut timed_out = false;
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    on_reply(&text);
                    if text == notice::TIMED_OUT {
                        timed_out = true;
                        let _ = ws.close(None).await;
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Connection ended: {}", e);
                    break;
                }
            }
        }

        Ok(UploadReport {
            bytes,
            circuit,
            timed_out,
        })
    }

    /// Sends the breakpoint payload over a fresh connection.
    pub async fn send_debug_info(&self, info: &DebugInfo) -> Result<()> {
        let (mut ws, _) = connect_async(self.url()).await?;
        ws.send(Message::Text(serde_json::to_string(info)?)).await?;

        tokio::time::sleep(DEBUG_LINGER).await;
        let _ = ws.close(None).await;
        Ok(())
    }

    /// Extracts the sketch breakpoints of `artifact` and sends them.
    ///
    /// Returns how many breakpoints were sent.
    pub async fn send_breakpoints(&self, artifact: &Path) -> Result<usize> {
        let artifact = artifact.to_path_buf();
        let records =
            tokio::task::spawn_blocking(move || BreakpointExtractor::new().extract(&artifact))
                .await??;

        let info = DebugInfo::from_records(&records);
        debug!("Breakpoints: {:?}", info.breakpoints);
        self.send_debug_info(&info).await?;
        Ok(records.len())
    }
}
