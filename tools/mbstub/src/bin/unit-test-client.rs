//! Stub Modbus master: writes the fixed sequence once and exits

use std::time::Duration;

use clap::Parser;
use mb_protocols::{ModbusClient, ModbusConnection};
use mbstub::{connect_with_retry, write_scenario, StubArgs, StubTransport};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "unit-test-client", about = "Stub Modbus master")]
struct Cli {
    #[command(flatten)]
    stub: StubArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.stub.service.init_logging()?;

    let connection = match cli.stub.transport {
        StubTransport::Rtu => ModbusConnection::open_rtu(&cli.stub.serial())?,
        StubTransport::Tcp => {
            connect_with_retry(&cli.stub.host, cli.stub.port, REQUEST_TIMEOUT).await?
        },
    };
    let mut client = ModbusClient::new(connection, REQUEST_TIMEOUT);
    write_scenario(&mut client, cli.stub.id).await?;
    Ok(())
}
