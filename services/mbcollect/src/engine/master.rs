//! Master role: poll remote devices and emit what they return

use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::time::Duration;

use mb_comlink::error::Result as LinkResult;
use mb_comlink::{
    decode_item, ConfiguredItem, IntSignedness, RawRegisterGroup, ReadingEvent, ReadingSink,
};
use mb_protocols::{ModbusClient, ModbusConnection, SerialSettings};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::emit_or_cancel;
use crate::error::Result;
use crate::report;

/// Least wait between reconnect attempts, whatever the poll interval
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Where the polled devices are reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterLink {
    /// Shared serial line, every remote polled in turn
    Serial(SerialSettings),
    /// One Modbus-TCP server
    Tcp { ip: Ipv4Addr, port: u16 },
}

/// A device and the register ranges read from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledRemote {
    pub name: String,
    pub unit_id: u8,
    pub items: Vec<ConfiguredItem>,
}

#[derive(Debug, Clone)]
pub struct MasterEngine {
    link: MasterLink,
    remotes: Vec<PolledRemote>,
    interval: Duration,
    timeout: Duration,
    signedness: IntSignedness,
}

impl MasterEngine {
    pub fn new(
        link: MasterLink,
        remotes: Vec<PolledRemote>,
        interval: Duration,
        timeout: Duration,
        signedness: IntSignedness,
    ) -> Self {
        Self {
            link,
            remotes,
            interval,
            timeout,
            signedness,
        }
    }

    pub fn link(&self) -> &MasterLink {
        &self.link
    }

    pub fn remotes(&self) -> &[PolledRemote] {
        &self.remotes
    }

    /// Identity and capability lines of every remote, then the link line
    pub fn report<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        for remote in &self.remotes {
            let identity = match &self.link {
                MasterLink::Serial(_) => report::slave_identity(&remote.name, remote.unit_id),
                MasterLink::Tcp { ip, port } => report::server_identity(&remote.name, *ip, *port),
            };
            report::emit(out, &identity)?;
            for item in &remote.items {
                report::emit(out, &report::capability(item))?;
            }
        }

        let link = match &self.link {
            MasterLink::Serial(serial) => report::opening(serial),
            MasterLink::Tcp { ip, port } => report::connecting(&ip.to_string(), *port),
        };
        report::emit(out, &link)
    }

    /// Open the link. Failing here is fatal to the collector.
    pub async fn open(self) -> Result<MasterSession> {
        let connection = connect(&self.link, self.timeout).await?;
        let client = ModbusClient::new(connection, self.timeout);
        Ok(MasterSession {
            engine: self,
            client: Some(client),
        })
    }
}

async fn connect(link: &MasterLink, timeout: Duration) -> LinkResult<ModbusConnection> {
    match link {
        MasterLink::Serial(serial) => ModbusConnection::open_rtu(serial),
        MasterLink::Tcp { ip, port } => {
            ModbusConnection::connect_tcp(&ip.to_string(), *port, timeout).await
        },
    }
}

/// Time left until the next multiple of `interval` on the wall clock.
/// A zero interval means no wait.
pub fn delay_until_next_tick(now_ms: i64, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis() as i64;
    if interval_ms == 0 {
        return Duration::ZERO;
    }
    let elapsed = now_ms.rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - elapsed) as u64)
}

/// Opened master engine
#[derive(Debug)]
pub struct MasterSession {
    engine: MasterEngine,
    /// `None` after the TCP connection dropped
    client: Option<ModbusClient>,
}

impl MasterSession {
    /// Poll until cancelled. Only a failing sink ends the loop with an error.
    pub async fn run<S: ReadingSink>(
        mut self,
        mut sink: S,
        token: CancellationToken,
    ) -> Result<()> {
        loop {
            let delay = delay_until_next_tick(
                chrono::Utc::now().timestamp_millis(),
                self.engine.interval,
            );
            if !delay.is_zero() {
                debug!("Next poll in {:?}", delay);
            }
            tokio::select! {
                () = token.cancelled() => return Ok(()),
                () = sleep(delay) => {},
            }

            if self.client.is_none() && !self.reconnect().await {
                tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    () = sleep(RECONNECT_BACKOFF) => {},
                }
                continue;
            }
            if !self.poll_cycle(&mut sink, &token).await? {
                return Ok(());
            }
        }
    }

    async fn reconnect(&mut self) -> bool {
        match connect(&self.engine.link, self.engine.timeout).await {
            Ok(connection) => {
                info!("Link to {} re-established", describe(&self.engine.link));
                self.client = Some(ModbusClient::new(connection, self.engine.timeout));
                true
            },
            Err(e) => {
                warn!("Reconnect to {} failed: {}", describe(&self.engine.link), e);
                false
            },
        }
    }

    /// One pass over every remote and item. Returns false once cancelled.
    async fn poll_cycle<S: ReadingSink>(
        &mut self,
        sink: &mut S,
        token: &CancellationToken,
    ) -> Result<bool> {
        let Some(client) = self.client.as_mut() else {
            return Ok(true);
        };
        let tcp = matches!(self.engine.link, MasterLink::Tcp { .. });
        let mut link_lost = false;

        'cycle: for remote in &self.engine.remotes {
            for item in &remote.items {
                let read = client.read_holding_registers(remote.unit_id, item.address, item.count);
                let result = tokio::select! {
                    () = token.cancelled() => return Ok(false),
                    r = read => r,
                };

                let words = match result {
                    Ok(words) => words,
                    Err(e) => {
                        warn!(
                            "{} (ID {}) address {} count {}: {}",
                            remote.name, remote.unit_id, item.address, item.count, e
                        );
                        if tcp && e.needs_reconnect() {
                            link_lost = true;
                            break 'cycle;
                        }
                        continue;
                    },
                };
                debug!(
                    "RX {} (ID {}) address {}: {:04X?}",
                    remote.name, remote.unit_id, item.address, words
                );

                let group = RawRegisterGroup::new(item.address, words);
                match decode_item(&group, item, self.engine.signedness) {
                    Ok(values) => {
                        let event = ReadingEvent::master(&remote.name, values);
                        if !emit_or_cancel(sink, event, token).await? {
                            return Ok(false);
                        }
                    },
                    Err(e) => warn!("{} address {}: {}", remote.name, item.address, e),
                }
            }
        }

        if link_lost {
            warn!(
                "Link to {} lost, reconnecting next cycle",
                describe(&self.engine.link)
            );
            self.client = None;
        }
        Ok(true)
    }
}

fn describe(link: &MasterLink) -> String {
    match link {
        MasterLink::Serial(serial) => serial.device.clone(),
        MasterLink::Tcp { ip, port } => format!("{}:{}", ip, port),
    }
}
