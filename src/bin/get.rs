//! Lists the pods held by a freshly synced shared informer.

use std::{process::ExitCode, time::Duration};

use anyhow::Context;
use clap::Parser;
use kube_pod_watch::{connect, Config, InformerFactory, LabelSelector, QualifiedName};
use tokio_util::sync::CancellationToken;

/// List pods in all namespaces from a synced informer cache.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    config: Config,

    /// Label selector to filter on, e.g. `app=web,tier!=db`. Matches everything by default.
    #[arg(short = 'l', long, default_value = "")]
    selector: LabelSelector,
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

    let factory = InformerFactory::new(client, Duration::ZERO);
    let pods = factory.pods();

    let stop = CancellationToken::new();
    factory.start(&stop);
    factory.wait_for_cache_sync(&stop).await;

    let listed = pods
        .lister()
        .list(&args.selector)
        .context("Error obtaining pod from shared informer")?;

    log::info!(length = listed.len(); "Length of obtained pods");
    for pod in &listed {
        log::info!(
            pod:% = QualifiedName::from_resource(pod.as_ref());
            "Obtained pod from shared informer"
        );
    }

    stop.cancel();
    Ok(())
}
