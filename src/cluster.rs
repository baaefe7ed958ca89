//! The cluster API as consumed by this crate.
//!
//! [`Cluster`] is the seam between the fan-out machinery and a live API server:
//! listing pods, opening port-forward streams, raw subresource requests, exec
//! and logs. [`KubeCluster`] implements it over kube-rs; tests substitute an
//! in-memory fake.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{Api, AttachParams, ListParams, LogParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::error::ClusterError;
use crate::models::k8s::{PodInfo, Selector, FIELD_SELECTOR, LABEL_SELECTOR};

/// A bidirectional byte stream to one pod port.
pub trait UpstreamStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> UpstreamStream for T {}

/// Output captured from a remote command. `status` is the outcome of the
/// session itself; the buffers are filled even when it failed.
#[derive(Debug)]
pub struct ExecCapture {
    pub stdout: String,
    pub stderr: String,
    pub status: Result<(), ClusterError>,
}

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Version reported by the API server.
    async fn server_version(&self) -> Result<Info, ClusterError>;

    /// List pods in `namespace` filtered by the selector's query parameters.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<PodInfo>, ClusterError>;

    /// Negotiate a port-forward stream to `pod:port`.
    async fn port_forward(
        &self,
        pod: &str,
        namespace: &str,
        port: u16,
    ) -> Result<Box<dyn UpstreamStream>, ClusterError>;

    /// Send a raw request (path relative to the API server) and return the
    /// response body.
    async fn request_raw(&self, request: http::Request<Vec<u8>>) -> Result<Vec<u8>, ClusterError>;

    /// Run `command` in a container with stdin disabled.
    async fn exec(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        command: Vec<String>,
    ) -> ExecCapture;

    /// Fetch a container's logs, optionally from its previous instance.
    async fn logs(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        previous: bool,
    ) -> Result<String, ClusterError>;
}

/// [`Cluster`] backed by a kube-rs client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn list_params(selector: &Selector) -> ListParams {
    let mut lp = ListParams::default();
    for (key, value) in selector.params() {
        match key.as_str() {
            LABEL_SELECTOR => lp = lp.labels(value),
            FIELD_SELECTOR => lp = lp.fields(value),
            other => log::warn!("pods: ignoring unsupported list parameter {other}={value}"),
        }
    }
    lp
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn server_version(&self) -> Result<Info, ClusterError> {
        Ok(self.client.apiserver_version().await?)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        let list = self.pods(namespace).list(&list_params(selector)).await?;
        Ok(list.items.iter().map(PodInfo::from).collect())
    }

    async fn port_forward(
        &self,
        pod: &str,
        namespace: &str,
        port: u16,
    ) -> Result<Box<dyn UpstreamStream>, ClusterError> {
        let mut forwarder = self.pods(namespace).portforward(pod, &[port]).await?;
        let stream = forwarder
            .take_stream(port)
            .ok_or_else(|| ClusterError::Stream(format!("port {port} missing from forwarder")))?;
        Ok(Box::new(Forwarded {
            stream,
            _forwarder: forwarder,
        }))
    }

    async fn request_raw(&self, request: http::Request<Vec<u8>>) -> Result<Vec<u8>, ClusterError> {
        // Bodies are opaque bytes; request_text would reject anything not UTF-8.
        let reader = self.client.request_stream(request).await?;
        futures::pin_mut!(reader);
        let mut body = Vec::new();
        futures::AsyncReadExt::read_to_end(&mut reader, &mut body).await?;
        Ok(body)
    }

    async fn exec(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        command: Vec<String>,
    ) -> ExecCapture {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = match self.pods(namespace).exec(pod, command, &params).await {
            Ok(a) => a,
            Err(e) => {
                return ExecCapture {
                    stdout: String::new(),
                    stderr: String::new(),
                    status: Err(e.into()),
                }
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let out_reader = attached.stdout();
        let err_reader = attached.stderr();
        let status_fut = attached.take_status();

        let read_out = async {
            if let Some(mut r) = out_reader {
                r.read_to_end(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_err = async {
            if let Some(mut r) = err_reader {
                r.read_to_end(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out_res, err_res) = tokio::join!(read_out, read_err);

        let mut status = out_res.and(err_res).map_err(ClusterError::from);
        if status.is_ok() {
            if let Some(fut) = status_fut {
                if let Some(s) = fut.await {
                    if s.status.as_deref() == Some("Failure") {
                        status = Err(ClusterError::Remote(
                            s.message.unwrap_or_else(|| "command failed".to_string()),
                        ));
                    }
                }
            }
        }

        if let Err(e) = attached.join().await {
            log::debug!("exec: joining session for {pod}/{namespace}: {e}");
        }

        ExecCapture {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status,
        }
    }

    async fn logs(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        previous: bool,
    ) -> Result<String, ClusterError> {
        let lp = LogParams {
            container: (!container.is_empty()).then(|| container.to_string()),
            previous,
            ..LogParams::default()
        };
        Ok(self.pods(namespace).logs(pod, &lp).await?)
    }
}

/// A port-forward stream that keeps its forwarder alive for as long as the
/// stream is in use.
struct Forwarded<S> {
    stream: S,
    _forwarder: kube::api::Portforwarder,
}

impl<S: AsyncRead + Unpin> AsyncRead for Forwarded<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Forwarded<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
