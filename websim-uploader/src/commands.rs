//! CLI command implementations.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use websim_relay::{is_debug_board, RelayServer, ServerConfig, UploadClient, UploadReport};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Time given to a freshly spawned relay before the first connection.
const STARTUP_GRACE: Duration = Duration::from_secs(2);

/// Extra wait before the single retry after a fresh start.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// A relay is assumed to be running when its port cannot be bound.
pub fn server_running(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_err()
}

/// Re-executes this binary as a detached relay.
pub fn spawn_background_server(port: u16) -> Result<()> {
    let exe = std::env::current_exe()?;
    Command::new(exe)
        .arg("--daemon")
        .arg("--port")
        .arg(port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    println!("{} Server started in background", "[uploader]".cyan());
    Ok(())
}

/// Run the relay until interrupted.
pub async fn daemon(port: u16) -> Result<()> {
    let server = RelayServer::bind(ServerConfig::with_port(port)).await?;
    info!("WebSIM relay ready on port {}", port);
    server.run_until_shutdown().await?;
    Ok(())
}

/// Starts the relay unless one is already listening. Returns true if this
/// call started it.
async fn ensure_server(port: u16) -> Result<bool> {
    if server_running(port) {
        debug!("Relay already running on port {}", port);
        return Ok(false);
    }

    println!("{} Starting server in background...", "[uploader]".cyan());
    spawn_background_server(port)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Waiting for the relay to start...");
    tokio::time::sleep(STARTUP_GRACE).await;
    spinner.finish_and_clear();

    Ok(true)
}

/// Runs `attempt`, and once more after `delay` if it fails and the relay was
/// started by this invocation.
async fn send_with_retry<T, F, Fut>(started: bool, delay: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match attempt().await {
        Ok(value) => Ok(value),
        Err(e) if started => {
            println!("{} Error sending file: {}", "[uploader]".cyan(), e);
            println!("Waiting for server to fully start...");
            tokio::time::sleep(delay).await;
            attempt()
                .await
                .map_err(|e| format!("second attempt failed: {}", e).into())
        }
        Err(e) => Err(e),
    }
}

async fn send(client: &UploadClient, file: &Path, board: Option<&str>) -> Result<UploadReport> {
    let report = client
        .send_file(file, board, |text| {
            println!("{} received: {}", "[ide]".dimmed(), text);
        })
        .await?;
    Ok(report)
}

/// Upload a firmware image, starting the relay first if needed.
///
/// Without a file this only makes sure the relay is running.
pub async fn upload(
    file: Option<&Path>,
    board: Option<&str>,
    debug_board: Option<&str>,
    port: u16,
) -> Result<()> {
    let started = ensure_server(port).await?;

    let Some(file) = file else {
        return Ok(());
    };

    let client = UploadClient::new(port);
    let report = send_with_retry(started, RETRY_DELAY, || send(&client, file, board)).await?;

    if report.timed_out {
        return Err("no web browser connected to the simulator".into());
    }

    println!(
        "{} Sent {} ({} bytes)",
        "✓".green(),
        file.display().to_string().cyan(),
        report.bytes
    );
    if let Some(board) = board {
        println!("  board: {}", board.cyan());
    }
    if let Some(circuit) = &report.circuit {
        println!("  circuit: {}", circuit.display().to_string().dimmed());
    }

    if let Some(debug_board) = debug_board.filter(|b| is_debug_board(b)) {
        println!("{} DEBUG board: {}", "[uploader]".cyan(), debug_board);
        match client.send_breakpoints(file).await {
            Ok(count) => println!("{} Sent {} breakpoints", "✓".green(), count),
            Err(e) => warn!("Debug handling failed: {}", e),
        }
    }

    Ok(())
}
