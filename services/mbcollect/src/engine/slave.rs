//! Slave role: serve a remote master and emit every register write

use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::Duration;

use mb_comlink::{
    decode, infer_kind, ComLinkError, ConfiguredItem, IntSignedness, ReadingEvent, ReadingSink,
};
use mb_protocols::{
    addressing, Addressing, FrameDirection, ModbusConnection, ModbusFrameProcessor,
    ModbusListener, RegisterBank, SerialSettings,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::emit_or_cancel;
use crate::error::Result;
use crate::report;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Where the remote master reaches us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveLink {
    Serial(SerialSettings),
    Tcp { host: String, port: u16 },
}

#[derive(Debug, Clone)]
pub struct SlaveEngine {
    link: SlaveLink,
    unit_id: u8,
    items: Vec<ConfiguredItem>,
    signedness: IntSignedness,
}

impl SlaveEngine {
    /// `unit_id` filters serial requests; over TCP any unit id is served
    pub fn new(
        link: SlaveLink,
        unit_id: u8,
        items: Vec<ConfiguredItem>,
        signedness: IntSignedness,
    ) -> Self {
        Self {
            link,
            unit_id,
            items,
            signedness,
        }
    }

    pub fn link(&self) -> &SlaveLink {
        &self.link
    }

    pub fn report<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let line = match &self.link {
            SlaveLink::Serial(serial) => report::opening(serial),
            SlaveLink::Tcp { host, port } => report::listening(host, *port),
        };
        report::emit(out, &line)
    }

    /// Open the serial line or start listening
    pub async fn open(self) -> Result<SlaveSession> {
        let (endpoint, unit_filter) = match &self.link {
            SlaveLink::Serial(serial) => (
                Endpoint::Serial(ModbusConnection::open_rtu(serial)?),
                Some(self.unit_id),
            ),
            SlaveLink::Tcp { host, port } => {
                (Endpoint::Tcp(ModbusListener::bind(host, *port).await?), None)
            },
        };

        Ok(SlaveSession {
            endpoint,
            state: SlaveState {
                bank: RegisterBank::default(),
                items: self.items,
                unit_filter,
                signedness: self.signedness,
            },
        })
    }
}

#[derive(Debug)]
enum Endpoint {
    Serial(ModbusConnection),
    Tcp(ModbusListener),
}

#[derive(Debug)]
struct SlaveState {
    bank: RegisterBank,
    items: Vec<ConfiguredItem>,
    unit_filter: Option<u8>,
    signedness: IntSignedness,
}

/// Why serving one connection stopped
enum ConnectionEnd {
    Cancelled,
    Closed,
    Failed(ComLinkError),
}

/// Opened slave engine
#[derive(Debug)]
pub struct SlaveSession {
    endpoint: Endpoint,
    state: SlaveState,
}

impl SlaveSession {
    /// Bound address of a TCP slave
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Endpoint::Tcp(listener) => listener.local_addr().ok(),
            Endpoint::Serial(_) => None,
        }
    }

    /// Serve until cancelled
    pub async fn run<S: ReadingSink>(self, mut sink: S, token: CancellationToken) -> Result<()> {
        let SlaveSession { endpoint, mut state } = self;

        match endpoint {
            Endpoint::Serial(mut connection) => {
                match serve(&mut connection, &mut state, &mut sink, &token).await? {
                    ConnectionEnd::Cancelled => Ok(()),
                    ConnectionEnd::Closed => {
                        Err(ComLinkError::Closed("Serial line closed".to_string()).into())
                    },
                    ConnectionEnd::Failed(e) => Err(e.into()),
                }
            },
            Endpoint::Tcp(listener) => loop {
                let accepted = tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    r = listener.accept() => r,
                };
                let (mut connection, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    },
                };

                // One master at a time: the next accept waits for this one to leave
                match serve(&mut connection, &mut state, &mut sink, &token).await? {
                    ConnectionEnd::Cancelled => return Ok(()),
                    ConnectionEnd::Closed => info!("Master {} disconnected", peer),
                    ConnectionEnd::Failed(e) => warn!("Master {} dropped: {}", peer, e),
                }
            },
        }
    }
}

/// Answer requests on one connection until it closes. Only a failing sink is
/// an error; link problems end the connection.
async fn serve<S: ReadingSink>(
    connection: &mut ModbusConnection,
    state: &mut SlaveState,
    sink: &mut S,
    token: &CancellationToken,
) -> Result<ConnectionEnd> {
    let mode = connection.mode();
    let processor = ModbusFrameProcessor::new(mode);

    loop {
        let received = tokio::select! {
            () = token.cancelled() => return Ok(ConnectionEnd::Cancelled),
            r = connection.receive_frame(FrameDirection::Request, None) => r,
        };
        let frame = match received {
            Ok(frame) => frame,
            Err(ComLinkError::Closed(_)) => return Ok(ConnectionEnd::Closed),
            Err(
                e @ (ComLinkError::Timeout(_)
                | ComLinkError::Protocol(_)
                | ComLinkError::Decode(_)),
            ) => {
                warn!("Discarding incoming frame: {}", e);
                continue;
            },
            Err(e) => return Ok(ConnectionEnd::Failed(e)),
        };

        let (header, request) = match processor.parse_request(&frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Discarding request {:02X?}: {}", frame, e);
                continue;
            },
        };

        let addressed = addressing(mode, state.unit_filter, header.unit_id);
        if addressed == Addressing::Ignore {
            debug!("Ignoring request for unit {}", header.unit_id);
            continue;
        }

        let outcome = state.bank.handle(&request)?;
        if addressed == Addressing::Answer {
            let reply = processor.build_response(&header, &outcome.response);
            if let Err(e) = connection.send(&reply).await {
                return Ok(ConnectionEnd::Failed(e));
            }
        }

        let Some(group) = outcome.written else {
            continue;
        };
        let count = group.words.len() as u16;
        let kind = infer_kind(&state.items, group.base_address, count);
        debug!("Write at {}: {} values ({})", group.base_address, count, kind);

        match decode(&group, kind, state.signedness) {
            Ok(values) => {
                if !emit_or_cancel(sink, ReadingEvent::slave(values), token).await? {
                    return Ok(ConnectionEnd::Cancelled);
                }
            },
            Err(e) => warn!("Write at {}: {}", group.base_address, e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use mb_comlink::{RegisterValue, ValueKind};
    use mb_protocols::{ModbusClient, Parity};
    use tokio::sync::mpsc;
    use tokio_serial::SerialStream;

    fn tcp_engine(items: Vec<ConfiguredItem>) -> SlaveEngine {
        SlaveEngine::new(
            SlaveLink::Tcp {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            1,
            items,
            IntSignedness::Unsigned,
        )
    }

    async fn client_for(session: &SlaveSession) -> ModbusClient {
        let addr = session.local_addr().unwrap();
        let connection =
            ModbusConnection::connect_tcp("127.0.0.1", addr.port(), Duration::from_secs(1))
                .await
                .unwrap();
        ModbusClient::new(connection, Duration::from_secs(1))
    }

    #[test]
    fn test_report_lines() {
        let serial = SlaveEngine::new(
            SlaveLink::Serial(SerialSettings {
                device: "/dev/ttyUSB1".to_string(),
                baud_rate: 9600,
                parity: Parity::Even,
                data_bits: 8,
                stop_bits: 2,
            }),
            1,
            Vec::new(),
            IntSignedness::Unsigned,
        );
        let mut out = Vec::new();
        serial.report(&mut out).unwrap();
        tcp_engine(Vec::new()).report(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Opening /dev/ttyUSB1 at 9600 bauds (E, 8, 2)\nListening on 127.0.0.1:0\n"
        );
    }

    #[tokio::test]
    async fn test_writes_become_events() {
        let session = tcp_engine(Vec::new()).open().await.unwrap();
        let mut client = client_for(&session).await;

        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(session.run(tx, token.clone()));

        client.write_single_register(1, 0, 1234).await.unwrap();
        client.write_multiple_registers(1, 1, &[5678, 9012]).await.unwrap();
        // Reads are answered from the bank and emit nothing
        let words = client.read_holding_registers(1, 0, 3).await.unwrap();
        assert_eq!(words, vec![1234, 5678, 9012]);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.remote, None);
        assert_eq!(first.values.len(), 1);
        assert_eq!(first.values[0].address, 0);
        assert_eq!(first.values[0].value, RegisterValue::Int(1234));

        let second = rx.recv().await.unwrap();
        let pairs: Vec<_> = second.values.iter().map(|v| (v.address, v.value)).collect();
        assert_eq!(
            pairs,
            vec![(1, RegisterValue::Int(5678)), (2, RegisterValue::Int(9012))]
        );

        token.cancel();
        task.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_typed_by_covering_item() {
        let items = vec![ConfiguredItem::new(10, 4, ValueKind::FloatWordsMsb)];
        let session = tcp_engine(items).open().await.unwrap();
        let mut client = client_for(&session).await;

        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(session.run(tx, token.clone()));

        // 12345.6 as MSB words
        client
            .write_multiple_registers(1, 12, &[0x4640, 0xE666])
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.values.len(), 1);
        assert_eq!(event.values[0].address, 12);
        assert_eq!(event.values[0].value.to_string(), "12345.599609");

        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_function_gets_exception() {
        let session = tcp_engine(Vec::new()).open().await.unwrap();
        let addr = session.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(session.run(tx, token.clone()));

        let mut connection =
            ModbusConnection::connect_tcp("127.0.0.1", addr.port(), Duration::from_secs(1))
                .await
                .unwrap();
        // Read Coils, transaction 7, unit 1
        connection
            .send(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x08])
            .await
            .unwrap();
        let reply = connection
            .receive_frame(FrameDirection::Response, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(reply, vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x01]);

        token.cancel();
        task.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_serves_next_master_after_disconnect() {
        let session = tcp_engine(Vec::new()).open().await.unwrap();
        let addr = session.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(session.run(tx, token.clone()));

        for value in [1u16, 2] {
            let connection =
                ModbusConnection::connect_tcp("127.0.0.1", addr.port(), Duration::from_secs(1))
                    .await
                    .unwrap();
            let mut client = ModbusClient::new(connection, Duration::from_secs(1));
            client.write_single_register(1, 5, value).await.unwrap();
            let event = rx.recv().await.unwrap();
            assert_eq!(event.values[0].value, RegisterValue::Int(i64::from(value)));
        }

        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serial_slave_filters_units_and_silences_broadcast() {
        let (master_end, slave_end) = SerialStream::pair().unwrap();
        let mut client =
            ModbusClient::new(ModbusConnection::Rtu(master_end), Duration::from_millis(200));

        let mut state = SlaveState {
            bank: RegisterBank::default(),
            items: Vec::new(),
            unit_filter: Some(1),
            signedness: IntSignedness::Unsigned,
        };
        let (mut tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let serving = tokio::spawn({
            let token = token.clone();
            async move {
                let mut connection = ModbusConnection::Rtu(slave_end);
                serve(&mut connection, &mut state, &mut tx, &token)
                    .await
                    .map(|end| matches!(end, ConnectionEnd::Cancelled))
            }
        });

        client.write_single_register(1, 0, 11).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.values[0].value, RegisterValue::Int(11));

        // Another unit's request is neither answered nor applied
        let err = client.write_single_register(2, 0, 22).await.unwrap_err();
        assert!(matches!(err, ComLinkError::Timeout(_)));
        assert!(rx.try_recv().is_err());

        // Broadcast is applied without a reply
        let err = client.write_single_register(0, 1, 33).await.unwrap_err();
        assert!(matches!(err, ComLinkError::Timeout(_)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.values[0].address, 1);
        assert_eq!(event.values[0].value, RegisterValue::Int(33));

        let words = client.read_holding_registers(1, 0, 2).await.unwrap();
        assert_eq!(words, vec![11, 33]);

        token.cancel();
        assert!(serving.await.unwrap().unwrap());
    }
}
