//! Reading channel between collector and recorder
//!
//! A Unix-domain stream socket owned by the recorder. Each frame is a 4-byte
//! big-endian length followed by one JSON-encoded [`ReadingEvent`]. Frames
//! arrive in the order they were sent; nothing is dropped or coalesced.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ComLinkError, Result};
use crate::types::ReadingEvent;

/// Socket path used when none is configured
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mbsocket";

/// Upper bound on one encoded event
const MAX_FRAME_LENGTH: usize = 1024 * 1024;

const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(50);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Destination for decoded readings
#[async_trait]
pub trait ReadingSink: Send {
    /// Hand over one event. Blocks while the destination is full; never drops.
    async fn emit(&mut self, event: ReadingEvent) -> Result<()>;
}

#[async_trait]
impl ReadingSink for mpsc::Sender<ReadingEvent> {
    async fn emit(&mut self, event: ReadingEvent) -> Result<()> {
        self.send(event)
            .await
            .map_err(|_| ComLinkError::channel("Reading queue closed"))
    }
}

// ============================================================================
// Producer (collector side)
// ============================================================================

/// Writing end of the channel
#[derive(Debug)]
pub struct ReadingProducer {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

impl ReadingProducer {
    /// Connect once; fails if no recorder is listening
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            ComLinkError::channel(format!("Cannot connect to {}: {}", path.display(), e))
        })?;
        debug!("Reading channel connected: {}", path.display());
        Ok(Self {
            framed: Framed::new(stream, codec()),
        })
    }

    /// Keep retrying until the recorder attaches, `wait` elapses or `token`
    /// is cancelled
    pub async fn connect_with_wait(
        path: impl AsRef<Path>,
        wait: Duration,
        token: &CancellationToken,
    ) -> Result<Self> {
        let path = path.as_ref();
        let deadline = Instant::now() + wait;
        let mut delay = RETRY_INITIAL_DELAY;

        loop {
            match Self::connect(path).await {
                Ok(producer) => {
                    info!("Recorder attached at {}", path.display());
                    return Ok(producer);
                },
                Err(e) => {
                    if Instant::now() + delay > deadline {
                        return Err(ComLinkError::channel(format!(
                            "Recorder not reachable after {:?}: {}",
                            wait, e
                        )));
                    }
                    debug!("Waiting for recorder: {}", e);
                },
            }

            tokio::select! {
                () = sleep(delay) => {},
                () = token.cancelled() => return Err(ComLinkError::Cancelled),
            }
            delay = (delay * 2).min(RETRY_MAX_DELAY);
        }
    }

    /// Encode and write one event, flushing the frame
    pub async fn send(&mut self, event: &ReadingEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.framed
            .send(Bytes::from(payload))
            .await
            .map_err(|e| ComLinkError::channel(format!("Failed to write reading: {}", e)))
    }
}

#[async_trait]
impl ReadingSink for ReadingProducer {
    async fn emit(&mut self, event: ReadingEvent) -> Result<()> {
        self.send(&event).await
    }
}

// ============================================================================
// Consumer (recorder side)
// ============================================================================

/// Listening socket of the recorder
///
/// Binding removes a stale socket file left by a previous run; dropping the
/// listener removes the file again.
#[derive(Debug)]
pub struct ReadingListener {
    listener: UnixListener,
    path: PathBuf,
}

impl ReadingListener {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        match std::fs::remove_file(&path) {
            Ok(()) => info!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
                return Err(ComLinkError::channel(format!(
                    "Cannot remove stale socket {}: {}",
                    path.display(),
                    e
                )))
            },
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            ComLinkError::channel(format!("Cannot bind {}: {}", path.display(), e))
        })?;
        debug!("Reading channel listening: {}", path.display());

        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next collector to attach
    pub async fn accept(&self) -> Result<ReadingConsumer> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(ReadingConsumer {
            framed: Framed::new(stream, codec()),
        })
    }
}

impl Drop for ReadingListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove socket {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Reading end of one collector connection
#[derive(Debug)]
pub struct ReadingConsumer {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

impl ReadingConsumer {
    /// Next event, or `None` once the collector has closed its end
    pub async fn next_event(&mut self) -> Result<Option<ReadingEvent>> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(serde_json::from_slice(&frame)?)),
            Some(Err(e)) => Err(ComLinkError::channel(format!(
                "Failed to read reading frame: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mbsocket");
        std::fs::write(&path, b"left over").unwrap();

        let listener = ReadingListener::bind(&path).unwrap();
        assert!(logs_contain("Removed stale socket"));
        assert!(ReadingProducer::connect(&path).await.is_ok());

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_closed_queue_is_channel_error() {
        let (mut tx, rx) = mpsc::channel::<ReadingEvent>(1);
        drop(rx);
        let err = tx.emit(ReadingEvent::slave(Vec::new())).await.unwrap_err();
        assert!(matches!(err, ComLinkError::Channel(_)));
    }
}
