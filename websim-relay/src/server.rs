//! WebSocket server implementation.
//!
//! Accepts connections and runs one [`crate::session`] task per socket, all
//! sharing a single [`RelayHub`].

use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::error::Result;
use crate::hub::{HubConfig, RelayHub, SharedHub};
use crate::protocol::DEFAULT_PORT;
use crate::session::serve_connection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
    /// Hub behavior.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default configuration on another port.
    pub fn with_port(port: u16) -> Self {
        let mut config = Self::default();
        config.addr.set_port(port);
        config
    }
}

/// The WebSIM relay server.
pub struct RelayServer {
    listener: TcpListener,
    hub: SharedHub,
}

impl RelayServer {
    /// Binds the listener, opening the system browser when the simulator is
    /// needed.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        Self::bind_with_launcher(config, Arc::new(SystemBrowser)).await
    }

    /// Binds the listener with a custom browser launcher.
    pub async fn bind_with_launcher(
        config: ServerConfig,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.addr).await?;
        let hub = Arc::new(RelayHub::new(config.hub, launcher));
        Ok(Self { listener, hub })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the hub shared by all connections.
    pub fn hub(&self) -> SharedHub {
        self.hub.clone()
    }

    /// Accepts connections forever.
    pub async fn run(self) -> Result<()> {
        info!("Relay listening on ws://{}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);
                    let hub = self.hub.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, addr, hub).await {
                            warn!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Runs until Ctrl+C (or SIGTERM on Unix).
    pub async fn run_until_shutdown(self) -> Result<()> {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown_signal() => {
                info!("Shutting down server...");
                Ok(())
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
