// Requests carried over a port-forward tunnel instead of the API server proxy.
use http::Method;
use tokio_util::sync::CancellationToken;

use crate::client::MeshClient;
use crate::error::{Error, Result};
use crate::models::k8s::Target;
use crate::tunnel::Tunnel;

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::Parse(format!("invalid HTTP method {method:?}")))
}

impl MeshClient {
    /// Opens a tunnel from `local_address:local_port` to `pod:remote_port`.
    /// `local_port` 0 picks a free port; an empty address means the configured
    /// `local-address`.
    ///
    /// The caller owns the tunnel and must [`Tunnel::close`] it.
    pub async fn new_tunnel(
        &self,
        pod: &str,
        namespace: &str,
        local_address: &str,
        local_port: u16,
        remote_port: u16,
        cancel: &CancellationToken,
    ) -> Result<Tunnel> {
        let local_address = if local_address.is_empty() {
            self.config.local_address.as_str()
        } else {
            local_address
        };
        self.guarded(
            "open tunnel",
            cancel,
            Tunnel::open(
                self.cluster.clone(),
                Target::new(pod, namespace, remote_port),
                local_address,
                local_port,
                self.config.tunnel_ready_timeout(),
            ),
        )
        .await
    }

    /// Sends `method path` to the pod's Envoy admin port over a fresh tunnel
    /// and returns the full response body.
    pub async fn envoy_do(
        &self,
        pod: &str,
        namespace: &str,
        method: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let method = parse_method(method)?;
        let target = Target::new(pod, namespace, self.config.envoy_admin_port);
        self.tunnel_do(target, method, path, cancel).await
    }

    /// Opens a tunnel to `target`, issues one request against it and closes
    /// the tunnel before returning, whatever the outcome.
    pub async fn tunnel_do(
        &self,
        target: Target,
        method: Method,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut tunnel = self
            .guarded(
                "open tunnel",
                cancel,
                Tunnel::open(
                    self.cluster.clone(),
                    target,
                    &self.config.local_address,
                    0,
                    self.config.tunnel_ready_timeout(),
                ),
            )
            .await?;

        let url = format!(
            "http://{}/{}",
            tunnel.address(),
            path.trim_start_matches('/')
        );
        let result = self
            .guarded("tunnel request", cancel, async {
                let transport = |source: reqwest::Error| Error::Tunnel {
                    target: tunnel.target().to_string(),
                    source,
                };
                let response = self
                    .http
                    .request(method, &url)
                    .send()
                    .await
                    .map_err(transport)?;
                let body = response.bytes().await.map_err(transport)?;
                Ok(body.to_vec())
            })
            .await;

        tunnel.close().await;
        result
    }
}
