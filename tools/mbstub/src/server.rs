//! Stub slave answering reads and writes from a fixed register table

use std::net::SocketAddr;

use mb_comlink::{ComLinkError, Result};
use mb_protocols::constants::SLAVE_REGISTER_COUNT;
use mb_protocols::{
    addressing, Addressing, FrameDirection, ModbusConnection, ModbusFrameProcessor,
    ModbusListener, RegisterBank, SerialSettings,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::STUB_REGISTERS;

#[derive(Debug)]
enum StubEndpoint {
    Serial(ModbusConnection),
    Tcp(ModbusListener),
}

#[derive(Debug)]
pub struct StubServer {
    endpoint: StubEndpoint,
    bank: RegisterBank,
    unit_id: u8,
}

impl StubServer {
    /// Listen for masters. Any unit id is answered over TCP.
    pub async fn bind_tcp(host: &str, port: u16, unit_id: u8) -> Result<Self> {
        let listener = ModbusListener::bind(host, port).await?;
        Ok(Self::with_endpoint(StubEndpoint::Tcp(listener), unit_id))
    }

    /// Answer requests for `unit_id` on a serial line
    pub fn open_rtu(serial: &SerialSettings, unit_id: u8) -> Result<Self> {
        let connection = ModbusConnection::open_rtu(serial)?;
        Ok(Self::with_endpoint(StubEndpoint::Serial(connection), unit_id))
    }

    fn with_endpoint(endpoint: StubEndpoint, unit_id: u8) -> Self {
        Self {
            endpoint,
            bank: RegisterBank::with_values(SLAVE_REGISTER_COUNT, &STUB_REGISTERS),
            unit_id,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            StubEndpoint::Tcp(listener) => listener.local_addr().ok(),
            StubEndpoint::Serial(_) => None,
        }
    }

    /// Serve until cancelled
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let StubServer {
            endpoint,
            mut bank,
            unit_id,
        } = self;

        match endpoint {
            StubEndpoint::Serial(mut connection) => {
                answer(&mut connection, &mut bank, Some(unit_id), &token).await
            },
            StubEndpoint::Tcp(listener) => loop {
                let (mut connection, peer) = tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    r = listener.accept() => r?,
                };
                match answer(&mut connection, &mut bank, None, &token).await {
                    Ok(()) => {},
                    Err(ComLinkError::Closed(_)) => info!("Master {} left", peer),
                    Err(e) => warn!("Master {} dropped: {}", peer, e),
                }
                if token.is_cancelled() {
                    return Ok(());
                }
            },
        }
    }
}

/// Answer requests until the peer closes or `token` fires
async fn answer(
    connection: &mut ModbusConnection,
    bank: &mut RegisterBank,
    unit_filter: Option<u8>,
    token: &CancellationToken,
) -> Result<()> {
    let mode = connection.mode();
    let processor = ModbusFrameProcessor::new(mode);

    loop {
        let frame = tokio::select! {
            () = token.cancelled() => return Ok(()),
            r = connection.receive_frame(FrameDirection::Request, None) => r?,
        };
        let (header, request) = match processor.parse_request(&frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Bad request {:02X?}: {}", frame, e);
                continue;
            },
        };
        let addressed = addressing(mode, unit_filter, header.unit_id);
        if addressed == Addressing::Ignore {
            debug!("Not for us: unit {}", header.unit_id);
            continue;
        }

        let outcome = bank.handle(&request)?;
        if addressed == Addressing::Silent {
            continue;
        }
        connection
            .send(&processor.build_response(&header, &outcome.response))
            .await?;
    }
}
