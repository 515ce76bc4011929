use std::{process::ExitCode, time::Duration};

use clap::Parser;
use kube_pod_watch::{connect, Config, InformerFactory, PodLifecycleLogger};
use tokio_util::sync::CancellationToken;

/// Watch pods in all namespaces and log their lifecycle transitions.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    config: Config,

    /// Resync period in seconds; 0 disables periodic resync.
    #[arg(long, default_value_t = 0)]
    resync: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    args.config.init_logging();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = connect(&args.config).await?;

    let factory = InformerFactory::new(client, Duration::from_secs(args.resync));
    factory.pods().add_event_handler(PodLifecycleLogger);

    log::info!("Start");

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted, shutting down");
                stop.cancel();
            }
        }
    });

    factory.start(&stop);
    if factory.wait_for_cache_sync(&stop).await {
        log::debug!("Pod cache synced");
    }

    stop.cancelled().await;
    Ok(())
}
