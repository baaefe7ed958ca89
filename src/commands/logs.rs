use tokio_util::sync::CancellationToken;

use crate::client::MeshClient;
use crate::error::{Error, Result};

impl MeshClient {
    /// Returns the full log of `container` in `pod`. With `previous` set, the
    /// log of the container's last terminated instance is returned instead.
    pub async fn pod_logs(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        previous: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.guarded("pod logs", cancel, async {
            self.cluster
                .logs(pod, namespace, container, previous)
                .await
                .map_err(|source| Error::Logs {
                    pod: pod.to_string(),
                    namespace: namespace.to_string(),
                    source,
                })
        })
        .await
    }
}
