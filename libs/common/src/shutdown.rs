//! Process signal handling
//!
//! SIGINT and SIGTERM stop a service. SIGHUP asks it to reload its
//! configuration.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::warn;

/// What a received signal asks the service to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Terminate,
    Reload,
}

/// Signal streams installed once and polled for the life of the process
#[derive(Debug)]
pub struct SignalWatcher {
    terminate: Option<Signal>,
    hangup: Option<Signal>,
}

impl SignalWatcher {
    /// Install the SIGTERM and SIGHUP handlers. A handler that cannot be
    /// installed is logged and ignored; Ctrl+C always works.
    pub fn new() -> Self {
        Self {
            terminate: install(SignalKind::terminate(), "SIGTERM"),
            hangup: install(SignalKind::hangup(), "SIGHUP"),
        }
    }

    /// Wait for the next signal
    pub async fn recv(&mut self) -> LifecycleSignal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => LifecycleSignal::Terminate,
            _ = next(&mut self.terminate) => LifecycleSignal::Terminate,
            _ = next(&mut self.hangup) => LifecycleSignal::Reload,
        }
    }
}

impl Default for SignalWatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn install(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(sig) => Some(sig),
        Err(e) => {
            warn!("Failed to install {} handler: {}", name, e);
            None
        },
    }
}

async fn next(sig: &mut Option<Signal>) {
    match sig {
        Some(sig) => {
            if sig.recv().await.is_none() {
                std::future::pending::<()>().await
            }
        },
        None => std::future::pending::<()>().await,
    }
}

/// Wait for Ctrl+C or SIGTERM, ignoring reload requests
///
/// ```ignore
/// tokio::select! {
///     _ = common::shutdown::wait_for_shutdown() => info!("Shutdown signal received"),
///     res = serve(listener) => res?,
/// }
/// ```
pub async fn wait_for_shutdown() {
    let mut watcher = SignalWatcher::new();
    while watcher.recv().await != LifecycleSignal::Terminate {}
}
