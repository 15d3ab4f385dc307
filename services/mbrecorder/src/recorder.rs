//! Consumer side: accept collectors and write their readings out

use std::io::Write;
use std::time::Duration;

use mb_comlink::{ReadingEvent, ReadingListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::render::render_line;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Writes one flushed line per event
#[derive(Debug)]
pub struct Recorder<W: Write> {
    out: W,
    lines: u64,
}

impl<W: Write> Recorder<W> {
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    /// Write the event's line and flush it
    pub fn record(&mut self, event: &ReadingEvent) -> Result<()> {
        if event.values.is_empty() {
            debug!("Skipping empty reading");
            return Ok(());
        }
        let line = render_line(event);
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        self.lines += 1;
        Ok(())
    }

    /// Lines written so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Serve collectors one after the other until `token` is cancelled.
///
/// A collector that disconnects, or sends a malformed frame, is dropped and
/// the next one is accepted. Failing to write the output is fatal.
pub async fn serve<W: Write>(
    listener: &ReadingListener,
    recorder: &mut Recorder<W>,
    token: &CancellationToken,
) -> Result<()> {
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => return Ok(()),
            r = listener.accept() => r,
        };
        let mut consumer = match accepted {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!("Accept on {} failed: {}", listener.path().display(), e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            },
        };
        info!("Collector attached");

        loop {
            let next = tokio::select! {
                () = token.cancelled() => return Ok(()),
                r = consumer.next_event() => r,
            };
            match next {
                Ok(Some(event)) => recorder.record(&event)?,
                Ok(None) => {
                    info!("Collector detached after {} lines", recorder.lines());
                    break;
                },
                Err(e) => {
                    warn!("Dropping collector: {}", e);
                    break;
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use mb_comlink::{DecodedValue, ReadingProducer, RegisterValue};
    use tracing_test::traced_test;

    fn slave_event(address: u16, value: i64) -> ReadingEvent {
        ReadingEvent::slave(vec![DecodedValue {
            address,
            value: RegisterValue::Int(value),
        }])
    }

    #[test]
    fn test_record_counts_lines() {
        let mut recorder = Recorder::new(Vec::new());
        recorder.record(&slave_event(0, 1234)).unwrap();
        recorder.record(&ReadingEvent::slave(Vec::new())).unwrap();
        recorder.record(&slave_event(1, 5678)).unwrap();

        assert_eq!(recorder.lines(), 2);
        assert_eq!(recorder.into_inner(), b"mb_0 1234\nmb_1 5678\n");
    }

    /// Output that refuses every write
    struct ClosedOutput;

    impl Write for ClosedOutput {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_output_failure_is_reported() {
        let mut recorder = Recorder::new(ClosedOutput);
        assert!(recorder.record(&slave_event(0, 1)).is_err());
        assert_eq!(recorder.lines(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_collector_detach() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ReadingListener::bind(dir.path().join("mbsocket")).unwrap();
        let path = listener.path().to_path_buf();
        let token = CancellationToken::new();

        let collector = async {
            let mut producer = ReadingProducer::connect(&path).await.unwrap();
            producer.send(&slave_event(3, 42)).await.unwrap();
            drop(producer);
            for _ in 0..100 {
                if logs_contain("Collector detached after 1 lines") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            token.cancel();
        };

        let mut recorder = Recorder::new(Vec::new());
        let (served, ()) = tokio::join!(serve(&listener, &mut recorder, &token), collector);
        served.unwrap();

        assert!(logs_contain("Collector detached after 1 lines"));
        assert_eq!(recorder.into_inner(), b"mb_3 42\n");
    }
}
