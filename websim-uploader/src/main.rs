//! WebSIM Uploader - Command-line entry point
//!
//! Sends a compiled sketch to the WebSIM simulator. The first invocation
//! starts the relay in the background; later ones reuse it.

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use websim_relay::DEFAULT_PORT;

mod commands;

#[derive(Parser)]
#[command(name = "webuploader")]
#[command(author = "WebSIM Contributors")]
#[command(version)]
#[command(about = "Upload Arduino sketches to the WebSIM browser simulator", long_about = None)]
struct Cli {
    /// Firmware image to upload (usually the sketch's .hex)
    file: Option<PathBuf>,

    /// Switch the simulator to this board before uploading
    #[arg(long)]
    board: Option<String>,

    /// Debug board name; names containing _DBG also send line breakpoints
    #[arg(short = 'b', value_name = "BOARD")]
    debug_board: Option<String>,

    /// Relay port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Run the relay in the foreground
    #[arg(long, hide = true)]
    daemon: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| if cli.verbose { "debug" } else { "info" }.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = if cli.daemon {
        commands::daemon(cli.port).await
    } else {
        commands::upload(
            cli.file.as_deref(),
            cli.board.as_deref(),
            cli.debug_board.as_deref(),
            cli.port,
        )
        .await
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
