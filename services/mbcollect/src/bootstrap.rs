//! Command-line arguments for mbcollect

use std::path::PathBuf;

use clap::Parser;
use common::ServiceArgs;
use mb_protocols::Parity;

use crate::config::{Mode, SettingsOverrides};

/// Command-line arguments for mbcollect
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mbcollect",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus data collector",
    long_about = None
)]
pub struct Cli {
    /// Configuration file (TOML or YAML)
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// Role on the Modbus link
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Serial device
    #[arg(long)]
    pub device: Option<String>,

    /// Serial speed
    #[arg(short = 'b', long)]
    pub baud: Option<u32>,

    /// Serial parity (N, E or O)
    #[arg(short = 'p', long)]
    pub parity: Option<Parity>,

    /// Serial data bits
    #[arg(short = 'd', long = "databit")]
    pub data_bits: Option<u8>,

    /// Serial stop bits
    #[arg(short = 's', long = "stopbit")]
    pub stop_bits: Option<u8>,

    /// Polling interval in seconds (master mode)
    #[arg(short = 'i', long)]
    pub interval: Option<u64>,

    /// Path of the recorder socket
    #[arg(long = "socketfile")]
    pub socket_file: Option<PathBuf>,

    /// Write the process id to this file
    #[arg(long = "pidfile")]
    pub pid_file: Option<PathBuf>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub validate: bool,

    #[command(flatten)]
    pub service: ServiceArgs,
}

impl Cli {
    /// Settings given on the command line, layered over file and environment
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            mode: self.mode,
            device: self.device.clone(),
            baud: self.baud,
            parity: self.parity,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            interval_secs: self.interval,
            socket_file: self.socket_file.clone(),
            pid_file: self.pid_file.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_serial_flags() {
        let cli = Cli::try_parse_from([
            "mbcollect", "-f", "/etc/mb.toml", "--mode", "slave", "-b", "9600", "-p", "E",
            "-d", "7", "-s", "2", "-i", "5",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/mb.toml")));
        let overrides = cli.overrides();
        assert_eq!(overrides.mode, Some(Mode::Slave));
        assert_eq!(overrides.baud, Some(9600));
        assert_eq!(overrides.parity, Some(Parity::Even));
        assert_eq!(overrides.data_bits, Some(7));
        assert_eq!(overrides.stop_bits, Some(2));
        assert_eq!(overrides.interval_secs, Some(5));
        assert_eq!(overrides.device, None);
    }

    #[test]
    fn test_paths_and_service_args() {
        let cli = Cli::try_parse_from([
            "mbcollect",
            "--socketfile",
            "/run/mb.sock",
            "--pidfile",
            "/run/mbcollect.pid",
            "--validate",
            "-v",
        ])
        .unwrap();

        assert!(cli.validate);
        assert!(cli.service.verbose);
        assert_eq!(cli.overrides().socket_file, Some(PathBuf::from("/run/mb.sock")));
        assert_eq!(cli.overrides().pid_file, Some(PathBuf::from("/run/mbcollect.pid")));
    }

    #[test]
    fn test_bad_parity_rejected() {
        assert!(Cli::try_parse_from(["mbcollect", "-p", "X"]).is_err());
    }
}
