//! WebSIM Relay - WebSocket relay for the WebSIM simulator
//!
//! This crate connects a firmware uploader on the command line with the
//! WebSIM simulator running in a browser tab. Both sides talk to one local
//! WebSocket endpoint.
//!
//! The relay supports:
//! - Any number of concurrent connections, one of them designated browser
//! - Fan-out of text frames (board changes, circuit definitions, breakpoints)
//! - Forwarding of a firmware image to the browser, waiting for one if needed
//! - Opening the simulator page when an uploader arrives alone
//!
//! [`UploadClient`] is the other end: it sends a build artifact and reports
//! what the relay answered.

mod error;
pub mod browser;
pub mod client;
pub mod hub;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod session;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use client::{circuit_message, is_debug_board, UploadClient, UploadReport, CIRCUIT_FILE};
pub use error::{RelayError, Result};
pub use hub::{BinaryOutcome, HubConfig, RelayHub, SharedHub};
pub use peer::{Outbound, PeerHandle, PeerId};
pub use protocol::{
    classify_text, notice, ControlMessage, DebugInfo, Frame, PeerRole, TextKind, DEFAULT_PORT,
    SIMULATOR_URL, WEB_SIGNATURE,
};
pub use server::{RelayServer, ServerConfig};
pub use session::{serve_connection, SessionState, UploadSession};
