//! Modbus data collector
//!
//! Prints its startup report on stdout, then streams decoded readings to
//! mbrecorder until SIGINT/SIGTERM. SIGHUP reloads the configuration.

use clap::Parser;
use common::{LifecycleSignal, PidFile, SignalWatcher};
use mb_comlink::ReadingProducer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mbcollect::bootstrap::Cli;
use mbcollect::{collector, CollectConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.service.init_logging()?;

    let result = run(&cli).await;
    if let Err(e) = &result {
        error!("mbcollect failed: {:#}", e);
    }
    result
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let overrides = cli.overrides();
    let mut config = CollectConfig::load(cli.config.as_deref(), &overrides)?;

    if cli.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let _pid_file = config
        .settings
        .pid_file
        .as_ref()
        .map(PidFile::create)
        .transpose()?;

    let mut signals = SignalWatcher::new();
    let mut stdout = std::io::stdout();
    let mut producer: Option<ReadingProducer> = None;

    loop {
        let engines = collector::start(&config, &mut stdout).await?;
        let token = CancellationToken::new();

        let sink = match producer.take() {
            Some(producer) => producer,
            None => {
                let connect = ReadingProducer::connect_with_wait(
                    &config.settings.socket_file,
                    config.settings.socket_wait(),
                    &token,
                );
                tokio::select! {
                    r = connect => r?,
                    _ = signals.recv() => {
                        info!("mbcollect has been stopped");
                        return Ok(());
                    },
                }
            },
        };

        let running = collector::run(engines, sink, token.clone());
        tokio::pin!(running);
        let signal = tokio::select! {
            r = &mut running => {
                r?;
                info!("All engines stopped");
                return Ok(());
            },
            signal = signals.recv() => signal,
        };

        token.cancel();
        let sink = running.await?;

        match signal {
            LifecycleSignal::Terminate => {
                info!("mbcollect has been stopped");
                return Ok(());
            },
            LifecycleSignal::Reload => {
                info!("Reloading mbcollect configuration");
                let reloaded = CollectConfig::load(cli.config.as_deref(), &overrides)?;
                if reloaded.settings.socket_file == config.settings.socket_file {
                    producer = Some(sink);
                }
                config = reloaded;
            },
        }
    }
}
