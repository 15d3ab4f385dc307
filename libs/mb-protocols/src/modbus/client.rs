//! Master-side request/response over one link

use std::time::Duration;

use mb_comlink::error::{ComLinkError, Result};
use tokio::time::Instant;
use tracing::debug;

use super::connection::ModbusConnection;
use super::constants::{
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER,
};
use super::pdu::{ModbusPdu, PduBuilder};
use super::transport::{FrameDirection, ModbusFrameProcessor};

/// Synchronous request/response client: one outstanding request at a time
#[derive(Debug)]
pub struct ModbusClient {
    connection: ModbusConnection,
    processor: ModbusFrameProcessor,
    timeout: Duration,
}

impl ModbusClient {
    /// Wrap a connection; `timeout` bounds each request
    pub fn new(connection: ModbusConnection, timeout: Duration) -> Self {
        let processor = ModbusFrameProcessor::new(connection.mode());
        Self {
            connection,
            processor,
            timeout,
        }
    }

    /// FC03: read `quantity` holding registers starting at `address`
    pub async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        let request = PduBuilder::build_read_request(FC_READ_HOLDING_REGISTERS, address, quantity)?;
        let response = self.transact(unit_id, &request).await?;
        response.read_registers(FC_READ_HOLDING_REGISTERS, quantity)
    }

    /// FC06: write one register
    pub async fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<()> {
        let request = PduBuilder::build_write_single(address, value)?;
        let response = self.transact(unit_id, &request).await?;
        response.check_write_echo(FC_WRITE_SINGLE_REGISTER, address, value)
    }

    /// FC16: write consecutive registers
    pub async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> Result<()> {
        let request = PduBuilder::build_write_multiple(address, values)?;
        let response = self.transact(unit_id, &request).await?;
        response.check_write_echo(FC_WRITE_MULTIPLE_REGISTERS, address, values.len() as u16)
    }

    /// Send a request and wait for its response, skipping late answers to
    /// earlier requests
    async fn transact(&mut self, unit_id: u8, request: &ModbusPdu) -> Result<ModbusPdu> {
        let frame = self.processor.build_request(unit_id, request);
        self.connection.discard_pending_input();
        self.connection.send(&frame).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ComLinkError::timeout(format!(
                    "No response from unit {} within {:?}",
                    unit_id, self.timeout
                )));
            }

            let response = self
                .connection
                .receive_frame(FrameDirection::Response, Some(remaining))
                .await?;
            match self.processor.parse_response(&response)? {
                Some(pdu) => return Ok(pdu),
                None => debug!("Skipped stale response from unit {}", unit_id),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::modbus::connection::ModbusListener;
    use crate::modbus::server::RegisterBank;
    use crate::modbus::transport::ModbusMode;
    use tokio_serial::SerialStream;

    /// Answer one request on `connection` from `bank`
    async fn answer_once(connection: &mut ModbusConnection, bank: &mut RegisterBank) {
        let processor = ModbusFrameProcessor::new(connection.mode());
        let frame = connection
            .receive_frame(FrameDirection::Request, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        let (header, request) = processor.parse_request(&frame).unwrap();
        let outcome = bank.handle(&request).unwrap();
        connection
            .send(&processor.build_response(&header, &outcome.response))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rtu_late_reply_not_taken_for_next() {
        let (master_end, slave_end) = SerialStream::pair().unwrap();
        let mut client =
            ModbusClient::new(ModbusConnection::Rtu(master_end), Duration::from_millis(100));
        let mut slave = ModbusConnection::Rtu(slave_end);
        assert_eq!(slave.mode(), ModbusMode::Rtu);
        let mut bank = RegisterBank::with_values(8, &[0xAAAA, 0xBBBB, 1, 2]);

        // Nobody answers in time
        let err = client.read_holding_registers(1, 0, 2).await.unwrap_err();
        assert!(matches!(err, ComLinkError::Timeout(_)));

        // Then the slow reply shows up while the master is idle
        answer_once(&mut slave, &mut bank).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let responder = tokio::spawn(async move {
            answer_once(&mut slave, &mut bank).await;
        });
        let words = client.read_holding_registers(1, 2, 2).await.unwrap();
        assert_eq!(words, vec![1, 2]);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_stall_inside_frame_needs_reconnect() {
        let listener = ModbusListener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = ModbusConnection::connect_tcp("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let mut client = ModbusClient::new(connection, Duration::from_secs(3));

        let (mut server, _) = listener.accept().await.unwrap();
        let stalling = tokio::spawn(async move {
            server
                .receive_frame(FrameDirection::Request, Some(Duration::from_secs(1)))
                .await
                .unwrap();
            // Transaction id and half the protocol id, then nothing
            server.send(&[0x00, 0x01, 0x00]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            server
        });

        let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ComLinkError::Connection(_)), "{err:?}");
        assert!(err.needs_reconnect());
        stalling.abort();
    }

    #[tokio::test]
    async fn test_tcp_late_reply_skipped_by_transaction_id() {
        let listener = ModbusListener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = ModbusConnection::connect_tcp("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let mut client = ModbusClient::new(connection, Duration::from_millis(200));
        let (mut server, _) = listener.accept().await.unwrap();
        let mut bank = RegisterBank::with_values(8, &[0xAAAA, 0xBBBB, 1, 2]);

        let err = client.read_holding_registers(1, 0, 2).await.unwrap_err();
        assert!(matches!(err, ComLinkError::Timeout(_)));
        assert!(!err.needs_reconnect());

        let responder = tokio::spawn(async move {
            // Late answer to the first request, then the real one
            answer_once(&mut server, &mut bank).await;
            answer_once(&mut server, &mut bank).await;
        });
        let words = client.read_holding_registers(1, 2, 2).await.unwrap();
        assert_eq!(words, vec![1, 2]);
        responder.await.unwrap();
    }
}
