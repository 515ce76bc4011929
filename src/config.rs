//! Connection settings and client construction.

use std::{fmt, path::PathBuf, str::FromStr};

use kube_client::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube_client::Client;

/// Cluster connection flags shared by every binary.
///
/// Parsed once at startup and passed to [`connect`] by reference.
/// Long flags take two dashes; the single-dash `-kubeconfig`/`-master` spelling is rejected.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Config {
    /// Path to a kubeconfig. Only required if out-of-cluster.
    /// Takes two dashes: single-dash `-kubeconfig` is not accepted.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// The address of the Kubernetes API server. Overrides any value in kubeconfig.
    /// Only required if out-of-cluster.
    /// Takes two dashes: single-dash `-master` is not accepted.
    #[arg(long)]
    pub master: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    fn kubeconfig_path(&self) -> Option<&PathBuf> {
        self.kubeconfig
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    fn master_url(&self) -> Option<&str> {
        self.master.as_deref().filter(|url| !url.is_empty())
    }

    /// The log level implied by `-v` flags.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Installs the process logger: `RUST_LOG` directives on top of the `-v` level.
    pub fn init_logging(&self) {
        env_logger::Builder::new()
            .filter_level(self.log_level())
            .parse_default_env()
            .init();
    }

    /// Resolves the client configuration without contacting the cluster.
    ///
    /// With `--master` and no `--kubeconfig`, ambient configuration is used when present,
    /// otherwise the master address alone.
    pub async fn resolve(&self) -> Result<kube_client::Config, BootstrapError> {
        let mut config = match (self.kubeconfig_path(), self.master_url()) {
            (Some(path), _) => {
                let kubeconfig =
                    Kubeconfig::read_from(path).map_err(|source| BootstrapError::ReadKubeconfig {
                        path: path.clone(),
                        source,
                    })?;
                kube_client::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions::default(),
                )
                .await
                .map_err(BootstrapError::LoadKubeconfig)?
            }
            (None, None) => kube_client::Config::infer()
                .await
                .map_err(BootstrapError::Infer)?,
            (None, Some(master)) => match kube_client::Config::infer().await {
                Ok(config) => config,
                Err(err) => {
                    log::debug!(error:% = err; "No ambient cluster configuration, using master only");
                    kube_client::Config::new(parse_url(master)?)
                }
            },
        };

        if let Some(master) = self.master_url() {
            config.cluster_url = parse_url(master)?;
        }

        Ok(config)
    }
}

fn parse_url<T>(url: &str) -> Result<T, BootstrapError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    url.parse().map_err(|err: T::Err| BootstrapError::InvalidMaster {
        url: url.to_owned(),
        reason: err.to_string(),
    })
}

/// Builds a client from the connection flags.
pub async fn connect(config: &Config) -> Result<Client, BootstrapError> {
    let resolved = config.resolve().await?;
    log::debug!(cluster_url:% = resolved.cluster_url; "Resolved cluster connection");
    Client::try_from(resolved).map_err(BootstrapError::Client)
}

/// The error type returned by [`connect`].
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("error reading kubeconfig {}: {source}", path.display())]
    ReadKubeconfig {
        path: PathBuf,
        #[source]
        source: KubeconfigError,
    },
    #[error("error building kubeconfig: {0}")]
    LoadKubeconfig(#[source] KubeconfigError),
    #[error("error inferring cluster configuration: {0}")]
    Infer(#[source] InferConfigError),
    #[error("invalid master url {url:?}: {reason}")]
    InvalidMaster { url: String, reason: String },
    #[error("error building kubernetes client: {0}")]
    Client(#[source] kube_client::Error),
}
