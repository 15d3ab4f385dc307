//! Collector configuration
//!
//! Loaded from a TOML or YAML file, `MBCOLLECT_*` environment variables and
//! command-line overrides, in that order of increasing priority.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::config_loader;
use figment::providers::Serialized;
use mb_comlink::{ConfiguredItem, IntSignedness, DEFAULT_SOCKET_PATH};
use mb_protocols::{Parity, SerialSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CollectError, Result};

/// Files tried, in order, when no `--config` is given
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["mbcollect.toml", "/etc/mbcollect.toml"];

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "MBCOLLECT_";

/// Default Modbus-TCP port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Highest unit id a serial slave may use
const MAX_UNIT_ID: u8 = 247;

/// Unit id sent to TCP servers configured without one
const TCP_DEFAULT_UNIT_ID: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Master,
    Slave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Rtu,
    Tcp,
}

/// `[settings]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: Mode,
    pub transport: Transport,
    /// Own unit id in serial slave mode
    pub id: u8,
    pub device: String,
    pub baud: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// Listen address in TCP slave mode
    pub host: String,
    pub port: u16,
    /// Polling period in seconds, 0 polls back to back
    pub interval_secs: u64,
    pub timeout_ms: u64,
    pub socket_file: PathBuf,
    /// How long to wait for the recorder at startup
    pub socket_wait_secs: u64,
    pub pid_file: Option<PathBuf>,
    pub int_signedness: IntSignedness,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Master,
            transport: Transport::Rtu,
            id: 1,
            device: "/dev/ttyUSB0".to_string(),
            baud: 115_200,
            parity: Parity::Odd,
            data_bits: 8,
            stop_bits: 1,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_TCP_PORT,
            interval_secs: 10,
            timeout_ms: 1000,
            socket_file: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_wait_secs: 10,
            pid_file: None,
            int_signedness: IntSignedness::Unsigned,
        }
    }
}

impl Settings {
    pub fn serial(&self) -> SerialSettings {
        SerialSettings {
            device: self.device.clone(),
            baud_rate: self.baud,
            parity: self.parity,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn socket_wait(&self) -> Duration {
        Duration::from_secs(self.socket_wait_secs)
    }
}

/// One `[[remotes]]` entry: a device polled in master mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    /// Unit id; required on a serial line
    #[serde(default)]
    pub id: Option<u8>,
    /// Server address; required over TCP
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default)]
    pub items: Vec<ConfiguredItem>,
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

impl RemoteConfig {
    pub fn unit_id(&self) -> u8 {
        self.id.unwrap_or(TCP_DEFAULT_UNIT_ID)
    }
}

/// Command-line values layered over the file and environment
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parity: Option<Parity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_bits: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_bits: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,
}

/// Whole collector configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectConfig {
    #[serde(default)]
    pub settings: Settings,
    /// Devices polled in master mode
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
    /// Type map for registers written in slave mode
    #[serde(default)]
    pub items: Vec<ConfiguredItem>,
}

impl CollectConfig {
    /// Load and validate. Without `path` the search paths are tried; finding
    /// no file is fine as long as the result validates.
    pub fn load(path: Option<&Path>, overrides: &SettingsOverrides) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => config_loader::find_config_file(&CONFIG_SEARCH_PATHS),
        };
        if path.is_none() {
            debug!("No configuration file found, using defaults");
        }

        let figment = config_loader::layered_figment(path.as_deref(), ENV_PREFIX)?
            .merge(Serialized::default("settings", overrides));
        let config: Self = config_loader::extract(&figment)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let settings = &self.settings;

        if settings.timeout_ms == 0 {
            return Err(CollectError::config("timeout_ms must be greater than 0"));
        }
        if settings.socket_file.as_os_str().is_empty() {
            return Err(CollectError::config("socket_file must not be empty"));
        }
        if settings.transport == Transport::Rtu {
            validate_serial(settings)?;
        }

        match settings.mode {
            Mode::Master => self.validate_master(),
            Mode::Slave => self.validate_slave(),
        }
    }

    fn validate_master(&self) -> Result<()> {
        if self.remotes.is_empty() {
            return Err(CollectError::config(
                "Master mode needs at least one [[remotes]] entry",
            ));
        }
        if !self.items.is_empty() {
            warn!("Top-level [[items]] are only used in slave mode, ignoring them");
        }

        for remote in &self.remotes {
            if remote.name.is_empty() || remote.name.contains(char::is_whitespace) {
                return Err(CollectError::config(format!(
                    "Invalid remote name '{}'",
                    remote.name
                )));
            }
            if remote.items.is_empty() {
                return Err(CollectError::config(format!(
                    "Remote '{}' has no items",
                    remote.name
                )));
            }

            match self.settings.transport {
                Transport::Rtu => match remote.id {
                    Some(id) if (1..=MAX_UNIT_ID).contains(&id) => {},
                    Some(id) => {
                        return Err(CollectError::config(format!(
                            "Remote '{}': unit id {} out of range 1..={}",
                            remote.name, id, MAX_UNIT_ID
                        )))
                    },
                    None => {
                        return Err(CollectError::config(format!(
                            "Remote '{}' needs an id on a serial line",
                            remote.name
                        )))
                    },
                },
                Transport::Tcp => {
                    if remote.ip.is_none() {
                        return Err(CollectError::config(format!(
                            "Remote '{}' needs an ip over TCP",
                            remote.name
                        )));
                    }
                    if remote.port == 0 {
                        return Err(CollectError::config(format!(
                            "Remote '{}': port must not be 0",
                            remote.name
                        )));
                    }
                },
            }

            for item in &remote.items {
                item.validate().map_err(|e| {
                    CollectError::config(format!("Remote '{}': {}", remote.name, e))
                })?;
            }
        }
        Ok(())
    }

    fn validate_slave(&self) -> Result<()> {
        if !self.remotes.is_empty() {
            warn!("[[remotes]] are only used in master mode, ignoring them");
        }
        if self.settings.transport == Transport::Rtu
            && !(1..=MAX_UNIT_ID).contains(&self.settings.id)
        {
            return Err(CollectError::config(format!(
                "Slave unit id {} out of range 1..={}",
                self.settings.id, MAX_UNIT_ID
            )));
        }

        for (index, item) in self.items.iter().enumerate() {
            item.validate()?;
            // Write typing must be unambiguous
            if let Some(other) = self.items[..index].iter().find(|o| o.overlaps(item)) {
                return Err(CollectError::config(format!(
                    "Items at addresses {} and {} overlap",
                    other.address, item.address
                )));
            }
        }
        Ok(())
    }
}

fn validate_serial(settings: &Settings) -> Result<()> {
    if settings.device.is_empty() {
        return Err(CollectError::config("device must not be empty"));
    }
    if settings.baud == 0 {
        return Err(CollectError::config("baud must be greater than 0"));
    }
    if !(5..=8).contains(&settings.data_bits) {
        return Err(CollectError::config(format!(
            "data_bits must be 5 to 8, got {}",
            settings.data_bits
        )));
    }
    if !(1..=2).contains(&settings.stop_bits) {
        return Err(CollectError::config(format!(
            "stop_bits must be 1 or 2, got {}",
            settings.stop_bits
        )));
    }
    Ok(())
}
