//! Reading recorder
//!
//! Accepts mbcollect on a Unix socket and prints every reading as one line
//! on stdout until SIGINT/SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use common::ServiceArgs;
use mb_comlink::{ReadingListener, DEFAULT_SOCKET_PATH};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mbrecorder::{serve, Recorder};

/// Command-line arguments for mbrecorder
#[derive(Parser, Debug)]
#[command(
    name = "mbrecorder",
    version = env!("CARGO_PKG_VERSION"),
    about = "Records mbcollect readings on stdout",
    long_about = None
)]
struct Cli {
    /// Path of the reading socket
    #[arg(long = "socketfile", default_value = DEFAULT_SOCKET_PATH)]
    socket_file: PathBuf,

    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.service.init_logging()?;

    let listener = ReadingListener::bind(&cli.socket_file)?;
    info!("Recording readings from {}", listener.path().display());

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        common::wait_for_shutdown().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let mut recorder = Recorder::new(std::io::stdout());
    if let Err(e) = serve(&listener, &mut recorder, &token).await {
        error!("mbrecorder failed: {}", e);
        return Err(e.into());
    }

    info!("mbrecorder has been stopped ({} lines)", recorder.lines());
    Ok(())
}
