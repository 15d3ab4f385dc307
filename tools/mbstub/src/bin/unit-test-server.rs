//! Stub Modbus slave serving a fixed register table until SIGINT/SIGTERM

use clap::Parser;
use mbstub::{StubArgs, StubServer, StubTransport};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "unit-test-server", about = "Stub Modbus slave")]
struct Cli {
    #[command(flatten)]
    stub: StubArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.stub.service.init_logging()?;

    let server = match cli.stub.transport {
        StubTransport::Rtu => StubServer::open_rtu(&cli.stub.serial(), cli.stub.id)?,
        StubTransport::Tcp => {
            StubServer::bind_tcp(&cli.stub.host, cli.stub.port, cli.stub.id).await?
        },
    };

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        common::wait_for_shutdown().await;
        stop.cancel();
    });

    server.run(token).await?;
    info!("unit-test-server stopped");
    Ok(())
}
