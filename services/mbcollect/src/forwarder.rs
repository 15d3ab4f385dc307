//! Single owner of the reading sink
//!
//! Engines push into a bounded queue; this task drains it in arrival order
//! into the real sink, so engines never share the socket.

use mb_comlink::{ReadingEvent, ReadingSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::Result;

/// Capacity of the engine → forwarder queue
pub const QUEUE_CAPACITY: usize = 256;

/// Forward until every sender is gone, then hand the sink back.
///
/// A sink failure cancels `token` so the engines stop too.
pub async fn forward<S: ReadingSink>(
    mut queue: mpsc::Receiver<ReadingEvent>,
    mut sink: S,
    token: CancellationToken,
) -> Result<S> {
    let mut forwarded = 0u64;
    while let Some(event) = queue.recv().await {
        if let Err(e) = sink.emit(event).await {
            error!("Reading channel failed: {}", e);
            token.cancel();
            return Err(e.into());
        }
        forwarded += 1;
    }
    debug!("Forwarder done after {} events", forwarded);
    Ok(sink)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use mb_comlink::{ComLinkError, DecodedValue, RegisterValue};

    fn event(address: u16) -> ReadingEvent {
        ReadingEvent::slave(vec![DecodedValue {
            address,
            value: RegisterValue::Int(i64::from(address)),
        }])
    }

    /// Accepts a fixed number of events, then fails
    struct FlakySink {
        accepted: Vec<ReadingEvent>,
        budget: usize,
    }

    #[async_trait::async_trait]
    impl ReadingSink for FlakySink {
        async fn emit(&mut self, event: ReadingEvent) -> mb_comlink::Result<()> {
            if self.accepted.len() == self.budget {
                return Err(ComLinkError::channel("recorder gone"));
            }
            self.accepted.push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_forwards_in_order_and_returns_sink() {
        let (tx, rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let task = tokio::spawn(forward(rx, out_tx, token.clone()));

        for address in 0..10 {
            tx.send(event(address)).await.unwrap();
        }
        drop(tx);

        let _sink = task.await.unwrap().unwrap();
        for address in 0..10 {
            assert_eq!(out_rx.recv().await.unwrap(), event(address));
        }
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_sink_failure_cancels_engines() {
        let (tx, rx) = mpsc::channel(4);
        let sink = FlakySink {
            accepted: Vec::new(),
            budget: 1,
        };
        let token = CancellationToken::new();
        let task = tokio::spawn(forward(rx, sink, token.clone()));

        tx.send(event(1)).await.unwrap();
        tx.send(event(2)).await.unwrap();

        assert!(task.await.unwrap().is_err());
        assert!(token.is_cancelled());
    }
}
