//! Collector lifecycle: start the engines, run them, stop them

use std::io::Write;

use mb_comlink::ReadingSink;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::CollectConfig;
use crate::engine::{ActiveEngine, RoleEngine};
use crate::error::{CollectError, Result};
use crate::forwarder::{forward, QUEUE_CAPACITY};

/// Print every engine's report and open its link, engine by engine so the
/// report lines of different engines never interleave.
pub async fn start<W: Write + ?Sized>(
    config: &CollectConfig,
    out: &mut W,
) -> Result<Vec<ActiveEngine>> {
    let engines = RoleEngine::plan(config)?;
    let mut active = Vec::with_capacity(engines.len());
    for engine in engines {
        engine.report(out)?;
        active.push(engine.open().await?);
    }
    info!("{} engine(s) started", active.len());
    Ok(active)
}

/// Run the engines until `token` is cancelled or one of them fails.
///
/// Every event goes through one forwarder task that owns `sink`. The sink is
/// handed back once all engines have stopped, so it can outlive a reload.
pub async fn run<S>(engines: Vec<ActiveEngine>, sink: S, token: CancellationToken) -> Result<S>
where
    S: ReadingSink + 'static,
{
    let token = token.child_token();
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let forwarder = tokio::spawn(forward(rx, sink, token.clone()));

    let mut tasks = JoinSet::new();
    for engine in engines {
        tasks.spawn(engine.run(tx.clone(), token.clone()));
    }
    drop(tx);

    let mut outcome = Ok(());
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| CollectError::Task(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = result {
            error!("Engine stopped: {}", e);
            token.cancel();
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
    }

    let sink = forwarder
        .await
        .map_err(|e| CollectError::Task(e.to_string()))??;
    outcome.map(|()| sink)
}
