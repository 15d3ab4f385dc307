//! Role engines
//!
//! The configuration resolves once into a set of [`RoleEngine`]s. Each goes
//! through three phases: `report` prints its startup lines, `open` brings up
//! its link, and the resulting [`ActiveEngine`] runs until cancelled.

pub mod master;
pub mod slave;

use std::io::{self, Write};

use mb_comlink::{ReadingEvent, ReadingSink};
use tokio_util::sync::CancellationToken;

pub use master::{MasterEngine, MasterLink, MasterSession, PolledRemote};
pub use slave::{SlaveEngine, SlaveLink, SlaveSession};

use crate::config::{CollectConfig, Mode, Transport};
use crate::error::{CollectError, Result};

#[derive(Debug, Clone)]
pub enum RoleEngine {
    Master(MasterEngine),
    Slave(SlaveEngine),
}

impl RoleEngine {
    /// Engines for a validated configuration.
    ///
    /// A serial master is one engine polling every remote over the shared
    /// line; a TCP master gets one engine per server. A slave is one engine.
    pub fn plan(config: &CollectConfig) -> Result<Vec<RoleEngine>> {
        let settings = &config.settings;

        let engines = match (settings.mode, settings.transport) {
            (Mode::Master, Transport::Rtu) => {
                let remotes = config
                    .remotes
                    .iter()
                    .map(|remote| PolledRemote {
                        name: remote.name.clone(),
                        unit_id: remote.unit_id(),
                        items: remote.items.clone(),
                    })
                    .collect();
                vec![RoleEngine::Master(MasterEngine::new(
                    MasterLink::Serial(settings.serial()),
                    remotes,
                    settings.interval(),
                    settings.timeout(),
                    settings.int_signedness,
                ))]
            },
            (Mode::Master, Transport::Tcp) => config
                .remotes
                .iter()
                .map(|remote| {
                    let ip = remote.ip.ok_or_else(|| {
                        CollectError::config(format!("Remote '{}' has no ip", remote.name))
                    })?;
                    Ok(RoleEngine::Master(MasterEngine::new(
                        MasterLink::Tcp {
                            ip,
                            port: remote.port,
                        },
                        vec![PolledRemote {
                            name: remote.name.clone(),
                            unit_id: remote.unit_id(),
                            items: remote.items.clone(),
                        }],
                        settings.interval(),
                        settings.timeout(),
                        settings.int_signedness,
                    )))
                })
                .collect::<Result<Vec<_>>>()?,
            (Mode::Slave, transport) => {
                let link = match transport {
                    Transport::Rtu => SlaveLink::Serial(settings.serial()),
                    Transport::Tcp => SlaveLink::Tcp {
                        host: settings.host.clone(),
                        port: settings.port,
                    },
                };
                vec![RoleEngine::Slave(SlaveEngine::new(
                    link,
                    settings.id,
                    config.items.clone(),
                    settings.int_signedness,
                ))]
            },
        };

        Ok(engines)
    }

    pub fn report<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        match self {
            RoleEngine::Master(engine) => engine.report(out),
            RoleEngine::Slave(engine) => engine.report(out),
        }
    }

    pub async fn open(self) -> Result<ActiveEngine> {
        match self {
            RoleEngine::Master(engine) => engine.open().await.map(ActiveEngine::Master),
            RoleEngine::Slave(engine) => engine.open().await.map(ActiveEngine::Slave),
        }
    }
}

/// An engine whose link is up
#[derive(Debug)]
pub enum ActiveEngine {
    Master(MasterSession),
    Slave(SlaveSession),
}

impl ActiveEngine {
    pub async fn run<S: ReadingSink>(self, sink: S, token: CancellationToken) -> Result<()> {
        match self {
            ActiveEngine::Master(session) => session.run(sink, token).await,
            ActiveEngine::Slave(session) => session.run(sink, token).await,
        }
    }
}

/// Emit unless cancelled first. `Ok(false)` means cancelled.
async fn emit_or_cancel<S: ReadingSink>(
    sink: &mut S,
    event: ReadingEvent,
    token: &CancellationToken,
) -> Result<bool> {
    tokio::select! {
        () = token.cancelled() => Ok(false),
        r = sink.emit(event) => r.map(|()| true).map_err(CollectError::from),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::{RemoteConfig, Settings};
    use mb_comlink::{ConfiguredItem, ValueKind};
    use std::net::Ipv4Addr;

    fn remote(name: &str, ip: Option<Ipv4Addr>) -> RemoteConfig {
        RemoteConfig {
            name: name.to_string(),
            id: Some(1),
            ip,
            port: 1502,
            items: vec![ConfiguredItem::new(0, 2, ValueKind::FloatWordsMsb)],
        }
    }

    #[test]
    fn test_serial_master_is_one_engine() {
        let config = CollectConfig {
            remotes: vec![remote("a", None), remote("b", None)],
            ..Default::default()
        };
        let engines = RoleEngine::plan(&config).unwrap();
        assert_eq!(engines.len(), 1);
        match &engines[0] {
            RoleEngine::Master(engine) => {
                assert!(matches!(engine.link(), MasterLink::Serial(_)));
                assert_eq!(engine.remotes().len(), 2);
            },
            RoleEngine::Slave(_) => panic!("expected a master engine"),
        }
    }

    #[test]
    fn test_tcp_master_engine_per_server() {
        let config = CollectConfig {
            settings: Settings {
                transport: Transport::Tcp,
                ..Default::default()
            },
            remotes: vec![
                remote("a", Some(Ipv4Addr::LOCALHOST)),
                remote("b", Some(Ipv4Addr::new(10, 0, 0, 2))),
            ],
            items: Vec::new(),
        };
        let engines = RoleEngine::plan(&config).unwrap();
        assert_eq!(engines.len(), 2);

        let mut out = Vec::new();
        for engine in &engines {
            engine.report(&mut out).unwrap();
        }
        let report = String::from_utf8(out).unwrap();
        let lines: Vec<_> = report.lines().collect();
        assert_eq!(lines[0], "Server name a, IP 127.0.0.1:1502");
        assert_eq!(lines[2], "Connecting to 127.0.0.1:1502");
        assert_eq!(lines[3], "Server name b, IP 10.0.0.2:1502");
        assert_eq!(lines[5], "Connecting to 10.0.0.2:1502");
    }

    #[test]
    fn test_slave_is_one_engine() {
        let config = CollectConfig {
            settings: Settings {
                mode: Mode::Slave,
                transport: Transport::Tcp,
                host: "127.0.0.1".to_string(),
                port: 1502,
                ..Default::default()
            },
            ..Default::default()
        };
        let engines = RoleEngine::plan(&config).unwrap();
        assert_eq!(engines.len(), 1);

        let mut out = Vec::new();
        engines[0].report(&mut out).unwrap();
        assert_eq!(out, b"Listening on 127.0.0.1:1502\n");
    }
}
