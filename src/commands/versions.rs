use chrono::Utc;
use k8s_openapi::apimachinery::pkg::version::Info;
use tokio_util::sync::CancellationToken;

use crate::client::{cancellable, MeshClient};
use crate::error::{Error, Result};
use crate::fanout::dispatch_all;
use crate::models::k8s::Selector;
use crate::models::version::{BuildInfo, ParsedVersion, ServerInfo, VersionReport};

const VERSION_PATH: &str = "/version";

impl MeshClient {
    /// Version of the Kubernetes API server itself.
    pub async fn kubernetes_version(&self, cancel: &CancellationToken) -> Result<Info> {
        self.guarded("kubernetes version", cancel, async {
            self.cluster
                .server_version()
                .await
                .map_err(|source| Error::ServerVersion { source })
        })
        .await
    }

    /// Collects the self-reported version of every running control-plane
    /// component of `revision`.
    ///
    /// Pods that fail to answer are recorded in [`VersionReport::errors`];
    /// the call itself only fails when no pod answered at all.
    pub async fn get_versions(
        &self,
        namespace: &str,
        revision: &str,
        cancel: &CancellationToken,
    ) -> Result<VersionReport> {
        let selector = Selector::new()
            .labels(self.config.component_selector.as_str())
            .fields(self.config.running_field_selector.as_str());
        let pods = self.resolve(namespace, selector, revision, cancel).await?;
        let targets = pods.targets(self.config.version_port);

        let client = self;
        let fanout = dispatch_all(&targets, self.config.max_concurrency, move |target| async move {
            client
                .deadline("version request", client.proxy_get(&target, VERSION_PATH))
                .await
        });
        let (versions, errors) = cancellable("get versions", cancel, async { Ok(fanout.await) })
            .await?
            .finish()?
            .into_parts();

        // Report in resolved order; pods with empty answers contribute nothing.
        let servers = pods
            .pods()
            .iter()
            .filter_map(|pod| {
                let raw = versions.get(&pod.name)?;
                let parsed = ParsedVersion::parse(&String::from_utf8_lossy(raw));
                Some(ServerInfo {
                    component: pod
                        .label(&self.config.component_label)
                        .unwrap_or_default()
                        .to_string(),
                    pod: pod.name.clone(),
                    info: BuildInfo::from(parsed),
                })
            })
            .collect();

        Ok(VersionReport {
            servers,
            errors,
            collected_at: Utc::now(),
        })
    }
}
