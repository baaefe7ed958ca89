// Pod resolution: selector (+ revision) -> concrete pods.
use tokio_util::sync::CancellationToken;

use crate::client::MeshClient;
use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::models::k8s::{PodInfo, ResolvedSet, Selector};

/// Lists the pods matching `selector` in `namespace`, with `revision` ANDed
/// into the label selector when non-empty.
///
/// The selector is taken by value; callers that reuse one should clone it.
/// Zero matches is [`Error::NoMatchingPods`], never an empty success.
pub async fn resolve(
    cluster: &dyn Cluster,
    namespace: &str,
    selector: Selector,
    revision_label: &str,
    revision: &str,
) -> Result<ResolvedSet> {
    let selector = selector.with_revision(revision_label, revision);

    let pods = cluster
        .list_pods(namespace, &selector)
        .await
        .map_err(|source| Error::ListPods {
            namespace: namespace.to_string(),
            source,
        })?;

    log::debug!("pods: {} match {selector} in {namespace}", pods.len());

    ResolvedSet::new(pods).ok_or_else(|| Error::NoMatchingPods {
        namespace: namespace.to_string(),
        selector: selector.to_string(),
    })
}

impl MeshClient {
    /// Resolves control-plane pods for one revision (empty for the default).
    pub async fn resolve(
        &self,
        namespace: &str,
        selector: Selector,
        revision: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSet> {
        self.guarded(
            "resolve pods",
            cancel,
            resolve(
                self.cluster.as_ref(),
                namespace,
                selector,
                &self.config.revision_label,
                revision,
            ),
        )
        .await
    }

    /// Lists pods matching every label selector. An empty result is allowed.
    pub async fn pods_for_selector(
        &self,
        namespace: &str,
        label_selectors: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<PodInfo>> {
        let selector = Selector::new().labels(label_selectors.join(","));
        self.guarded("list pods", cancel, async {
            self.cluster
                .list_pods(namespace, &selector)
                .await
                .map_err(|source| Error::ListPods {
                    namespace: namespace.to_string(),
                    source,
                })
        })
        .await
    }
}
