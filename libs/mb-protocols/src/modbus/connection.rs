//! Modbus Connection Management
//!
//! TCP and serial RTU links with frame-exact receive.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use mb_comlink::error::{ComLinkError, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use super::constants;
use super::transport::{rtu_frame_length, FrameDirection, ModbusMode, RtuLength};

/// Silence that ends an RTU frame of unknown layout, and the longest gap
/// tolerated between the bytes of one frame
const RTU_INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(100);

/// Time allowed for the rest of a frame once its first bytes arrived
const FRAME_BODY_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial line parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[serde(rename = "N", alias = "n", alias = "none", alias = "None")]
    None,
    #[serde(rename = "E", alias = "e", alias = "even", alias = "Even")]
    Even,
    #[default]
    #[serde(rename = "O", alias = "o", alias = "odd", alias = "Odd")]
    Odd,
}

impl Parity {
    pub fn as_char(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for Parity {
    type Err = ComLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(Parity::None),
            "E" | "EVEN" => Ok(Parity::Even),
            "O" | "ODD" => Ok(Parity::Odd),
            other => Err(ComLinkError::config(format!(
                "Invalid parity '{}' (expected N, E or O)",
                other
            ))),
        }
    }
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
}

/// Modbus connection type
#[derive(Debug)]
pub enum ModbusConnection {
    /// TCP connection
    Tcp(TcpStream),
    /// Serial RTU connection
    Rtu(SerialStream),
}

impl ModbusConnection {
    /// Create a TCP connection
    pub async fn connect_tcp(host: &str, port: u16, timeout_duration: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(timeout_duration, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(ModbusConnection::Tcp(stream))
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(ComLinkError::Connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(ComLinkError::Timeout(format!(
                    "Connection to {addr} timed out"
                )))
            },
        }
    }

    /// Open a serial RTU line
    pub fn open_rtu(settings: &SerialSettings) -> Result<Self> {
        debug!("RTU: {} @{}baud", settings.device, settings.baud_rate);

        let parity = match settings.parity {
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::None => tokio_serial::Parity::None,
        };

        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let stop_bits = match settings.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        match tokio_serial::new(&settings.device, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .open_native_async()
        {
            Ok(serial_port) => {
                info!("RTU opened: {}", settings.device);
                Ok(ModbusConnection::Rtu(serial_port))
            },
            Err(e) => {
                error!("RTU err: {} - {}", settings.device, e);
                Err(ComLinkError::Connection(format!(
                    "Failed to open serial port {}: {e}",
                    settings.device
                )))
            },
        }
    }

    pub fn mode(&self) -> ModbusMode {
        match self {
            ModbusConnection::Tcp(_) => ModbusMode::Tcp,
            ModbusConnection::Rtu(_) => ModbusMode::Rtu,
        }
    }

    /// Send one complete frame
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            ModbusConnection::Tcp(stream) => {
                stream.write_all(data).await.map_err(|e| {
                    error!("TCP TX: {}", e);
                    ComLinkError::from(e)
                })?;
            },
            ModbusConnection::Rtu(port) => {
                port.write_all(data).await.map_err(|e| {
                    error!("RTU TX: {}", e);
                    ComLinkError::from(e)
                })?;
                port.flush().await.map_err(ComLinkError::from)?;
            },
        }
        debug!("TX: {:02X?}", data);
        Ok(())
    }

    /// Drop unsolicited bytes waiting on a serial line, typically the late
    /// reply to a request that already timed out. RTU frames carry no
    /// transaction id, so anything left there would pass for the next reply.
    /// TCP responses are matched by transaction id instead and left alone.
    pub fn discard_pending_input(&mut self) {
        if let ModbusConnection::Rtu(port) = self {
            let discarded = discard_buffered(port);
            if discarded > 0 {
                warn!("RTU: discarded {} stale bytes", discarded);
            }
        }
    }

    /// Receive one complete frame.
    ///
    /// `first_byte_timeout` bounds the wait for the frame to start (`None`
    /// waits indefinitely, for a slave idling between requests); the rest of
    /// the frame must follow promptly.
    pub async fn receive_frame(
        &mut self,
        direction: FrameDirection,
        first_byte_timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let frame = match self {
            ModbusConnection::Tcp(stream) => receive_tcp(stream, first_byte_timeout).await?,
            ModbusConnection::Rtu(port) => receive_rtu(port, direction, first_byte_timeout).await?,
        };
        debug!("RX: {:02X?}", frame);
        Ok(frame)
    }
}

async fn read_exact_within<R>(
    reader: &mut R,
    buffer: &mut [u8],
    limit: Option<Duration>,
    what: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let read = reader.read_exact(buffer);
    let outcome = match limit {
        Some(limit) => timeout(limit, read)
            .await
            .map_err(|_| ComLinkError::timeout(format!("{what} read timeout")))?,
        None => read.await,
    };
    outcome.map(|_| ()).map_err(ComLinkError::from)
}

/// `[Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)]`
///
/// Once a frame has started, a stall leaves the stream out of step with the
/// MBAP boundaries, so it is reported as a connection error.
async fn receive_tcp(
    stream: &mut TcpStream,
    first_byte_timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    let mut frame = vec![0u8; constants::MBAP_HEADER_LEN];
    // A one-byte read either completes or takes nothing, so giving up on it
    // never splits a frame
    read_exact_within(stream, &mut frame[..1], first_byte_timeout, "TCP header").await?;
    read_exact_within(
        stream,
        &mut frame[1..],
        Some(FRAME_BODY_TIMEOUT),
        "TCP header",
    )
    .await
    .map_err(out_of_step)?;

    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    if length < 2 || length > constants::MAX_MBAP_LENGTH {
        error!("TCP invalid len: {}", length);
        return Err(ComLinkError::connection(format!(
            "Invalid TCP frame length: {}",
            length
        )));
    }

    frame.resize(constants::MBAP_HEADER_LEN + length, 0);
    read_exact_within(
        stream,
        &mut frame[constants::MBAP_HEADER_LEN..],
        Some(FRAME_BODY_TIMEOUT),
        "TCP PDU",
    )
    .await
    .map_err(out_of_step)?;

    Ok(frame)
}

fn out_of_step(err: ComLinkError) -> ComLinkError {
    match err {
        ComLinkError::Timeout(msg) => {
            warn!("TCP frame truncated: {}", msg);
            ComLinkError::connection(format!("{msg}, stream out of step"))
        },
        other => other,
    }
}

/// Throw away whatever the peer sent that nobody asked for yet, without
/// waiting. Returns the number of bytes dropped.
fn discard_buffered<R>(reader: &mut R) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; constants::MAX_RTU_FRAME];
    let mut discarded = 0;
    while let Some(Ok(bytes)) = reader.read(&mut scratch).now_or_never() {
        if bytes == 0 {
            break;
        }
        discarded += bytes;
    }
    discarded
}

/// `[Unit ID(1)][PDU(N)][CRC(2)]`
async fn receive_rtu(
    port: &mut SerialStream,
    direction: FrameDirection,
    first_byte_timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(constants::MAX_RTU_FRAME);
    let mut chunk = [0u8; constants::MAX_RTU_FRAME];
    let started = Instant::now();

    loop {
        let expected = rtu_frame_length(&frame, direction);
        if let RtuLength::Known(total) = expected {
            if total > constants::MAX_RTU_FRAME {
                return Err(ComLinkError::Protocol(format!(
                    "RTU frame length {} exceeds {}",
                    total,
                    constants::MAX_RTU_FRAME
                )));
            }
            if frame.len() >= total {
                if frame.len() > total {
                    debug!("RTU: dropping {} trailing bytes", frame.len() - total);
                    frame.truncate(total);
                }
                return Ok(frame);
            }
        }

        // Wait for the frame start under the caller's limit, then per byte
        let limit = if frame.is_empty() {
            first_byte_timeout
        } else if started.elapsed() > FRAME_BODY_TIMEOUT {
            return Err(ComLinkError::timeout(format!(
                "RTU frame incomplete after {}B",
                frame.len()
            )));
        } else {
            Some(RTU_INTER_BYTE_TIMEOUT)
        };

        let read = port.read(&mut chunk[..constants::MAX_RTU_FRAME - frame.len()]);
        let outcome = match limit {
            Some(limit) => match timeout(limit, read).await {
                Ok(outcome) => outcome,
                Err(_) if frame.is_empty() => {
                    return Err(ComLinkError::timeout("RTU response timeout"));
                },
                Err(_) if expected == RtuLength::Unknown && frame.len() >= 4 => {
                    // Line silence ends a frame we could not size up front
                    return Ok(frame);
                },
                Err(_) => {
                    return Err(ComLinkError::timeout(format!(
                        "RTU frame incomplete: inter-byte timeout after {}B",
                        frame.len()
                    )));
                },
            },
            None => read.await,
        };

        match outcome {
            Ok(0) => {
                error!("RTU closed");
                return Err(ComLinkError::Closed("Serial connection closed".to_string()));
            },
            Ok(bytes) => frame.extend_from_slice(&chunk[..bytes]),
            Err(e) => {
                error!("RTU RX: {}", e);
                return Err(ComLinkError::from(e));
            },
        }

        if frame.len() >= constants::MAX_RTU_FRAME
            && rtu_frame_length(&frame, direction) == RtuLength::Unknown
        {
            return Err(ComLinkError::Protocol(
                "RTU frame exceeds buffer size".to_string(),
            ));
        }
    }
}

/// Listening socket of a Modbus-TCP slave
#[derive(Debug)]
pub struct ModbusListener {
    listener: TcpListener,
}

impl ModbusListener {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!("TCP bind err: {} - {}", addr, e);
            ComLinkError::Connection(format!("Failed to listen on {addr}: {e}"))
        })?;
        info!("TCP listening: {}", addr);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(ComLinkError::from)
    }

    /// Wait for the next master
    pub async fn accept(&self) -> Result<(ModbusConnection, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await.map_err(ComLinkError::from)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY: {}", e);
        }
        info!("TCP master connected: {}", peer);
        Ok((ModbusConnection::Tcp(stream), peer))
    }
}
