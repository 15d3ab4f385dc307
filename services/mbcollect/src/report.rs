//! Startup report lines printed on stdout

use std::io::{self, Write};
use std::net::Ipv4Addr;

use mb_comlink::ConfiguredItem;
use mb_protocols::SerialSettings;

pub fn slave_identity(name: &str, unit_id: u8) -> String {
    format!("Slave name {}, ID {}", name, unit_id)
}

pub fn server_identity(name: &str, ip: Ipv4Addr, port: u16) -> String {
    format!("Server name {}, IP {}:{}", name, ip, port)
}

pub fn capability(item: &ConfiguredItem) -> String {
    format!(
        "Address {} => {} values ({})",
        item.address, item.count, item.kind
    )
}

pub fn opening(serial: &SerialSettings) -> String {
    format!(
        "Opening {} at {} bauds ({}, {}, {})",
        serial.device, serial.baud_rate, serial.parity, serial.data_bits, serial.stop_bits
    )
}

pub fn connecting(host: &str, port: u16) -> String {
    format!("Connecting to {}:{}", host, port)
}

pub fn listening(host: &str, port: u16) -> String {
    format!("Listening on {}:{}", host, port)
}

/// Write one line and flush so the report interleaves correctly with logs
pub fn emit<W: Write + ?Sized>(out: &mut W, line: &str) -> io::Result<()> {
    writeln!(out, "{}", line)?;
    out.flush()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use mb_comlink::ValueKind;
    use mb_protocols::Parity;

    #[test]
    fn test_identity_lines() {
        assert_eq!(slave_identity("hello", 1), "Slave name hello, ID 1");
        assert_eq!(
            server_identity("plant", Ipv4Addr::new(192, 168, 0, 7), 1502),
            "Server name plant, IP 192.168.0.7:1502"
        );
    }

    #[test]
    fn test_capability_line() {
        let item = ConfiguredItem::new(4, 3, ValueKind::Int16);
        assert_eq!(capability(&item), "Address 4 => 3 values (int)");
        let item = ConfiguredItem::new(2, 2, ValueKind::FloatWordsLsb);
        assert_eq!(capability(&item), "Address 2 => 2 values (floatlsb)");
    }

    #[test]
    fn test_link_lines() {
        let serial = SerialSettings {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
        };
        assert_eq!(opening(&serial), "Opening /dev/ttyUSB0 at 115200 bauds (N, 8, 1)");
        assert_eq!(connecting("127.0.0.1", 1502), "Connecting to 127.0.0.1:1502");
        assert_eq!(listening("0.0.0.0", 502), "Listening on 0.0.0.0:502");
    }

    #[test]
    fn test_emit_terminates_line() {
        let mut out = Vec::new();
        emit(&mut out, "Connecting to 127.0.0.1:1502").unwrap();
        assert_eq!(out, b"Connecting to 127.0.0.1:1502\n");
    }
}
