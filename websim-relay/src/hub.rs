//! The relay hub.
//!
//! The hub knows every connected peer and which one, if any, is the browser.
//! It pairs at most one firmware transfer with one browser tab at a time:
//! text is fanned out to everyone else, binary goes to the browser only.
//!
//! All state sits behind one mutex. Membership changes, browser designation,
//! broadcast iteration and the "is there a browser" check used before
//! forwarding are all taken under it, so a peer that disconnects can never be
//! picked as a forwarding target afterwards.

use crate::browser::BrowserLauncher;
use crate::peer::{PeerHandle, PeerId};
use crate::protocol::{classify_text, notice, Frame, PeerRole, TextKind, SIMULATOR_URL};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Hub behavior settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Page opened when an uploader connects without a browser.
    pub simulator_url: String,
    /// How often a pending binary transfer checks for a browser.
    pub poll_interval: Duration,
    /// How long a pending binary transfer waits for a browser.
    pub wait_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            simulator_url: SIMULATOR_URL.to_string(),
            poll_interval: Duration::from_millis(500),
            wait_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of [`RelayHub::route_binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOutcome {
    /// The payload was handed to the browser's connection.
    Delivered,
    /// The browser vanished before the payload could be handed over.
    DeliveryFailed,
    /// No browser showed up before the wait ceiling.
    TimedOut,
}

struct Registered {
    handle: PeerHandle,
    role: PeerRole,
}

#[derive(Default)]
struct HubState {
    peers: HashMap<PeerId, Registered>,
    browser: Option<PeerId>,
}

impl HubState {
    /// Removes a peer, clearing the browser designation if it was the browser.
    fn remove(&mut self, id: PeerId) -> Option<Registered> {
        if self.browser == Some(id) {
            self.browser = None;
        }
        self.peers.remove(&id)
    }

    fn designate_browser(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.role = PeerRole::Browser;
            if let Some(previous) = self.browser.replace(id) {
                if previous != id {
                    debug!("Browser designation moved from {} to {}", previous, id);
                }
            }
        }
    }

    fn browser(&self) -> Option<&PeerHandle> {
        self.browser
            .and_then(|id| self.peers.get(&id))
            .map(|peer| &peer.handle)
    }
}

/// Shared hub handle passed to every connection.
pub type SharedHub = Arc<RelayHub>;

/// Broker between the uploader and the browser simulator.
pub struct RelayHub {
    config: HubConfig,
    launcher: Arc<dyn BrowserLauncher>,
    state: Mutex<HubState>,
}

impl RelayHub {
    pub fn new(config: HubConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            launcher,
            state: Mutex::new(HubState::default()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Adds a peer, greets it and assigns its role.
    ///
    /// A browser takes over the browser designation. An uploader arriving
    /// while no browser is designated is warned and the simulator is opened,
    /// once per such connection.
    pub async fn register(&self, peer: PeerHandle, requested: PeerRole) -> PeerRole {
        let id = peer.id();
        let addr = peer.addr();
        let role = match requested {
            PeerRole::Browser => PeerRole::Browser,
            _ => PeerRole::Cli,
        };

        let open_browser = {
            let mut state = self.state.lock().await;

            if peer.send_text(notice::WELCOME).is_err() {
                debug!("Peer {} left before the greeting", addr);
            }

            let missing = role == PeerRole::Cli && state.browser.is_none();
            if missing {
                let _ = peer.send_text(notice::no_web_client(&self.config.simulator_url));
            }

            state.peers.insert(id, Registered { handle: peer, role });
            if role == PeerRole::Browser {
                state.designate_browser(id);
                info!("Web client connected from {}", addr);
            } else {
                info!("CLI client connected from {}", addr);
            }

            missing
        };

        if open_browser {
            if let Err(e) = self.launcher.open(&self.config.simulator_url) {
                warn!(
                    "Error opening browser ({}); please open '{}' manually",
                    e, self.config.simulator_url
                );
            }
        }

        role
    }

    /// Removes a peer. If it was the browser, the designation is cleared and
    /// not handed to anyone else.
    pub async fn unregister(&self, id: PeerId) -> Option<PeerRole> {
        let mut state = self.state.lock().await;
        let removed = state.remove(id)?;
        debug!("Peer {} ({}) unregistered", removed.handle.addr(), removed.role);
        Some(removed.role)
    }

    /// Broadcasts a text frame to every other peer.
    ///
    /// A peer whose connection is gone is dropped without interrupting the
    /// broadcast. A frame carrying the web signature then makes the sender
    /// the browser, whatever its role was.
    pub async fn route_text(&self, sender: &PeerHandle, text: &str) {
        let kind = classify_text(text);
        match &kind {
            TextKind::BoardChange(board) => info!("Board change requested: {}", board),
            TextKind::CircuitDefinition => info!("Circuit definition ({} bytes)", text.len()),
            _ => info!("Received text message: {}", text),
        }

        let mut state = self.state.lock().await;

        let failed: Vec<PeerId> = state
            .peers
            .iter()
            .filter(|(id, _)| **id != sender.id())
            .filter_map(|(id, peer)| peer.handle.send_text(text).err().map(|_| *id))
            .collect();

        for id in failed {
            if let Some(peer) = state.remove(id) {
                warn!("Error broadcasting to client {}", peer.handle.addr());
            }
        }

        if kind == TextKind::RoleAnnouncement {
            state.designate_browser(sender.id());
        }
    }

    /// Hands a firmware image to the browser.
    ///
    /// Without a browser the sender is told to wait and the hub polls every
    /// [`HubConfig::poll_interval`] up to [`HubConfig::wait_timeout`]. On
    /// timeout the sender gets an error notice and nothing is forwarded; its
    /// connection stays open. Otherwise the bytes go out unchanged and the
    /// sender's connection is closed, whether delivery worked or not.
    pub async fn route_binary(&self, sender: &PeerHandle, payload: Vec<u8>) -> BinaryOutcome {
        info!("Received binary message of size: {} bytes", payload.len());

        if !self.has_browser().await {
            let _ = sender.send_text(notice::WAITING_FOR_BROWSER);

            if !self.wait_for_browser().await {
                warn!("Timed out waiting for web browser client");
                let _ = sender.send_text(notice::TIMED_OUT);
                return BinaryOutcome::TimedOut;
            }

            let _ = sender.send_text(notice::BROWSER_CONNECTED);
        }

        let outcome = self.forward_to_browser(payload).await;
        if outcome == BinaryOutcome::DeliveryFailed {
            let _ = sender.send_text(notice::FORWARD_FAILED);
        }

        debug!("Closing CLI connection {}", sender.addr());
        let _ = sender.close();
        outcome
    }

    /// Picks the browser under the lock, then waits for its writer task to
    /// report the socket write with the lock released.
    async fn forward_to_browser(&self, payload: Vec<u8>) -> BinaryOutcome {
        let (browser, written) = {
            let mut state = self.state.lock().await;

            let Some(browser) = state.browser().cloned() else {
                warn!("Browser disconnected before the firmware could be sent");
                return BinaryOutcome::DeliveryFailed;
            };

            match browser.send_acked(Frame::Binary(payload)) {
                Ok(written) => (browser, written),
                Err(e) => {
                    warn!("Error sending to web client: {}", e);
                    state.remove(browser.id());
                    return BinaryOutcome::DeliveryFailed;
                }
            }
        };

        match written.await {
            Ok(Ok(())) => {
                info!("Firmware forwarded to web client {}", browser.addr());
                BinaryOutcome::Delivered
            }
            Ok(Err(e)) => {
                warn!("Error sending to web client {}: {}", browser.addr(), e);
                self.unregister(browser.id()).await;
                BinaryOutcome::DeliveryFailed
            }
            Err(_) => {
                warn!("Web client {} went away before the firmware was written", browser.addr());
                self.unregister(browser.id()).await;
                BinaryOutcome::DeliveryFailed
            }
        }
    }

    /// Polls for a browser until one is designated or the ceiling passes.
    async fn wait_for_browser(&self) -> bool {
        let deadline = Instant::now() + self.config.wait_timeout;
        let mut ticker = time::interval_at(
            Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.has_browser().await {
                        return true;
                    }
                }
                _ = time::sleep_until(deadline) => return false,
            }
        }
    }

    pub async fn has_browser(&self) -> bool {
        self.state.lock().await.browser.is_some()
    }

    /// The peer currently designated as browser.
    pub async fn browser(&self) -> Option<PeerId> {
        self.state.lock().await.browser
    }

    pub async fn role_of(&self, id: PeerId) -> Option<PeerRole> {
        self.state.lock().await.peers.get(&id).map(|peer| peer.role)
    }

    pub async fn peer_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }
}
