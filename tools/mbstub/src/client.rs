//! Stub master performing the fixed write sequence

use std::time::Duration;

use mb_comlink::Result;
use mb_protocols::{ModbusClient, ModbusConnection};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{MULTIPLE_WRITE, SINGLE_WRITE};

const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_PAUSE: Duration = Duration::from_millis(100);

/// Connect to a slave that may still be starting up
pub async fn connect_with_retry(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<ModbusConnection> {
    let mut attempt = 1;
    loop {
        match ModbusConnection::connect_tcp(host, port, timeout).await {
            Ok(connection) => return Ok(connection),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                debug!("Connect attempt {} to {}:{}: {}", attempt, host, port, e);
                attempt += 1;
                sleep(CONNECT_PAUSE).await;
            },
            Err(e) => return Err(e),
        }
    }
}

/// Write one register, then two consecutive ones
pub async fn write_scenario(client: &mut ModbusClient, unit_id: u8) -> Result<()> {
    let (address, value) = SINGLE_WRITE;
    client.write_single_register(unit_id, address, value).await?;
    info!("Wrote {} at {}", value, address);

    let (address, values) = MULTIPLE_WRITE;
    client.write_multiple_registers(unit_id, address, &values).await?;
    info!("Wrote {:?} at {}", values, address);
    Ok(())
}
