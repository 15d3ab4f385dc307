//! Command line shared by both stub binaries

use clap::{Args, ValueEnum};
use common::ServiceArgs;
use mb_protocols::{Parity, SerialSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StubTransport {
    Rtu,
    Tcp,
}

#[derive(Debug, Clone, Args)]
pub struct StubArgs {
    /// Link to use
    #[arg(value_enum)]
    pub transport: StubTransport,

    /// Serial device
    #[arg(long, default_value = "/dev/ttyUSB1")]
    pub device: String,

    #[arg(short = 'b', long, default_value_t = 115_200)]
    pub baud: u32,

    /// Serial parity (N, E or O)
    #[arg(short = 'p', long, default_value = "N")]
    pub parity: Parity,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 1502)]
    pub port: u16,

    /// Unit id of the stub slave, or the one addressed by the stub master
    #[arg(long, default_value_t = 1)]
    pub id: u8,

    #[command(flatten)]
    pub service: ServiceArgs,
}

impl StubArgs {
    pub fn serial(&self) -> SerialSettings {
        SerialSettings {
            device: self.device.clone(),
            baud_rate: self.baud,
            parity: self.parity,
            data_bits: 8,
            stop_bits: 1,
        }
    }
}
