//! WebSIM relay protocol.
//!
//! A single WebSocket endpoint carries two kinds of frames. Binary frames are
//! always a firmware image and are never inspected. Text frames are either
//! JSON objects understood by the simulator or plain diagnostic strings
//! produced by the relay itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_tungstenite::tungstenite::Message;
use websim_symbols::BreakpointRecord;

/// Port the relay listens on and the uploader connects to.
pub const DEFAULT_PORT: u16 = 8887;

/// Address of the hosted simulator.
pub const SIMULATOR_URL: &str = "https://websim-arduino.web.app";

/// Prefix the simulator puts on its messages; seeing it marks the sender as
/// the browser peer.
pub const WEB_SIGNATURE: &str = r#"{"from":"web""#;

/// Query pair sent by the browser when it connects.
pub const BROWSER_QUERY: &str = "from=web";

/// Query pair sent by the uploader when it connects.
pub const CLI_QUERY: &str = "from=cli";

/// Diagnostic strings sent by the relay.
pub mod notice {
    /// Greeting sent to every peer on connect.
    pub const WELCOME: &str = "Welcome to the WebSIM server!";

    /// Sent to a CLI peer while the relay waits for the browser. The wait
    /// ceiling itself is [`crate::HubConfig::wait_timeout`].
    pub const WAITING_FOR_BROWSER: &str = "Waiting for web browser to connect (timeout: 10s)...";

    pub const BROWSER_CONNECTED: &str = "Web browser client connected !";

    pub const TIMED_OUT: &str = "###### ERROR: Timed out waiting for web browser client";

    pub const FORWARD_FAILED: &str = "###### WARN: Failed to send to web client";

    /// Sent to a CLI peer that connects while no browser is present.
    pub fn no_web_client(url: &str) -> String {
        format!("###### WARN: NO WEB Client connected !! opening {}", url)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames and roles
// ─────────────────────────────────────────────────────────────────────────────

/// A single application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Converts a WebSocket message, ignoring control frames.
    pub fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(data) => Some(Self::Binary(data)),
            _ => None,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Binary(data) => Message::Binary(data),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a connected peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerRole {
    /// Not registered yet.
    #[default]
    Unknown,
    /// The command-line uploader.
    Cli,
    /// The simulator running in a browser tab.
    Browser,
}

impl PeerRole {
    /// Derives the role from the upgrade request URI.
    ///
    /// Only an explicit `from=web` query pair makes a browser; everything
    /// else, including a missing query, is treated as the uploader.
    pub fn from_request_uri(uri: &str) -> Self {
        let query = uri.split_once('?').map(|(_, q)| q).unwrap_or("");
        if query.split('&').any(|pair| pair == BROWSER_QUERY) {
            Self::Browser
        } else {
            Self::Cli
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Cli => "cli",
            Self::Browser => "web",
        };
        write!(f, "{}", s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Text payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Commands the uploader sends ahead of the firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Switch the simulated board.
    ChangeBoard { board: String },
    /// Circuit definition, the raw contents of `websim.json`.
    LoadCircuitJson { data: String },
}

/// Breakpoints for the legacy debug flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub from: String,
    pub breakpoints: Vec<String>,
    pub sources: Vec<String>,
}

impl DebugInfo {
    /// Builds the payload from sketch records, keeping their order.
    pub fn from_records(records: &[BreakpointRecord]) -> Self {
        Self {
            from: "cli".to_string(),
            breakpoints: records.iter().map(|r| r.address.clone()).collect(),
            sources: records.iter().map(|r| r.source_line.clone()).collect(),
        }
    }
}

/// How a text frame is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextKind {
    /// Carries [`WEB_SIGNATURE`]; the sender is the browser.
    RoleAnnouncement,
    BoardChange(String),
    CircuitDefinition,
    DebugInfo,
    /// Anything else, relayed untouched.
    Opaque,
}

/// Classifies a text frame. Every kind is still broadcast as-is; the
/// classification drives role detection and logging only.
pub fn classify_text(text: &str) -> TextKind {
    if text.contains(WEB_SIGNATURE) {
        return TextKind::RoleAnnouncement;
    }

    if let Ok(control) = serde_json::from_str::<ControlMessage>(text) {
        return match control {
            ControlMessage::ChangeBoard { board } => TextKind::BoardChange(board),
            ControlMessage::LoadCircuitJson { .. } => TextKind::CircuitDefinition,
        };
    }

    if serde_json::from_str::<DebugInfo>(text).is_ok() {
        return TextKind::DebugInfo;
    }

    TextKind::Opaque
}
