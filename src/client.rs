use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::commands::kubeconfig;
use crate::config::Config;
use crate::error::{Error, Result};

/// Entry point for the operations exposed to the surrounding tool.
///
/// The per-operation methods live next to each other in `commands/`; this type
/// only carries what they share.
#[derive(Clone)]
pub struct MeshClient {
    pub(crate) cluster: Arc<dyn Cluster>,
    pub(crate) config: Config,
    pub(crate) http: reqwest::Client,
}

impl MeshClient {
    pub fn new(cluster: Arc<dyn Cluster>, config: Config) -> Result<Self> {
        // Tunnel requests target loopback; never route them through a proxy.
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            cluster,
            config,
            http,
        })
    }

    /// Builds a client for the named kubeconfig context, or the current one.
    pub async fn connect(context: Option<&str>, config: Config) -> Result<Self> {
        let cluster = kubeconfig::connect(context).await?;
        Self::new(Arc::new(cluster), config)
    }

    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs `fut` until it finishes, `cancel` fires, or the request timeout
    /// elapses.
    pub(crate) async fn guarded<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        cancellable(operation, cancel, self.deadline(operation, fut)).await
    }

    /// Bounds `fut` by the request timeout only. Fan-out applies this per
    /// target so one stalled pod cannot discard the others' answers.
    pub(crate) async fn deadline<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.request_timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or_else(|_| Err(Error::Timeout { operation, timeout }))
    }
}

/// Runs `fut` until it finishes or `cancel` fires.
pub(crate) async fn cancellable<T, F>(
    operation: &'static str,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled { operation }),
        res = fut => res,
    }
}
