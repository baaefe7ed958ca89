#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube_fanout::{
    Cluster, ClusterError, Config, ExecCapture, MeshClient, PodInfo, Selector, UpstreamStream,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A cluster living in memory. Proxy responses are keyed by pod name and
/// port-forward streams are connected to `upstream`.
#[derive(Default)]
pub struct FakeCluster {
    pub pods: Vec<PodInfo>,
    pub upstream: Option<SocketAddr>,
    /// Port-forward negotiation never completes.
    pub stall_forwards: bool,
    pub responses: HashMap<String, Result<Vec<u8>, String>>,
    /// Pods whose proxy requests never complete.
    pub hanging: HashSet<String>,
    pub exec_stdout: String,
    pub exec_stderr: String,
    pub exec_failure: Option<String>,
    pub forwards: AtomicUsize,
    /// Upstream streams handed out and not yet dropped.
    pub live_upstreams: Arc<AtomicUsize>,
    pub listed: Mutex<Vec<Selector>>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn pod(mut self, name: &str, component: &str) -> Self {
        self.pods
            .push(PodInfo::new(name, "istio-system").with_label("istio", component));
        self
    }

    pub fn answers(mut self, pod: &str, body: &str) -> Self {
        self.responses
            .insert(pod.to_string(), Ok(body.as_bytes().to_vec()));
        self
    }

    pub fn answers_bytes(mut self, pod: &str, body: &[u8]) -> Self {
        self.responses.insert(pod.to_string(), Ok(body.to_vec()));
        self
    }

    pub fn hangs(mut self, pod: &str) -> Self {
        self.hanging.insert(pod.to_string());
        self
    }

    pub fn fails(mut self, pod: &str, msg: &str) -> Self {
        self.responses.insert(pod.to_string(), Err(msg.to_string()));
        self
    }

    pub fn forwarding_to(mut self, addr: SocketAddr) -> Self {
        self.upstream = Some(addr);
        self
    }

    pub fn last_label_selector(&self) -> Option<String> {
        self.listed
            .lock()
            .unwrap()
            .last()
            .and_then(|s| s.label_selector().map(str::to_string))
    }

    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }

    pub fn live_upstreams(&self) -> usize {
        self.live_upstreams.load(Ordering::SeqCst)
    }
}

/// Upstream stream that keeps [`FakeCluster::live_upstreams`] current.
struct Counted {
    stream: TcpStream,
    live: Arc<AtomicUsize>,
}

impl Counted {
    fn new(stream: TcpStream, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { stream, live }
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for Counted {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Counted {
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

#[async_trait]
impl Cluster for FakeCluster {
    async fn server_version(&self) -> Result<Info, ClusterError> {
        Ok(Info {
            git_version: "v1.30.2".to_string(),
            major: "1".to_string(),
            minor: "30".to_string(),
            ..Info::default()
        })
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        self.listed.lock().unwrap().push(selector.clone());
        Ok(self.pods.clone())
    }

    async fn port_forward(
        &self,
        pod: &str,
        _namespace: &str,
        _port: u16,
    ) -> Result<Box<dyn UpstreamStream>, ClusterError> {
        if self.stall_forwards {
            std::future::pending::<()>().await;
        }
        let addr = self
            .upstream
            .ok_or_else(|| ClusterError::Stream(format!("pod {pod} not found")))?;
        self.forwards.fetch_add(1, Ordering::SeqCst);
        let stream = TcpStream::connect(addr).await?;
        Ok(Box::new(Counted::new(stream, self.live_upstreams.clone())))
    }

    async fn request_raw(&self, request: http::Request<Vec<u8>>) -> Result<Vec<u8>, ClusterError> {
        let uri = request.uri().to_string();
        self.requests
            .lock()
            .unwrap()
            .push(format!("{} {uri}", request.method()));
        let pod = uri
            .split("/pods/")
            .nth(1)
            .and_then(|rest| rest.split(':').next())
            .unwrap_or_default()
            .to_string();
        if self.hanging.contains(&pod) {
            std::future::pending::<()>().await;
        }
        match self.responses.get(&pod) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(msg)) => Err(ClusterError::Remote(msg.clone())),
            None => Err(ClusterError::Remote(format!("no route to {pod}"))),
        }
    }

    async fn exec(
        &self,
        _pod: &str,
        _namespace: &str,
        _container: &str,
        _command: Vec<String>,
    ) -> ExecCapture {
        ExecCapture {
            stdout: self.exec_stdout.clone(),
            stderr: self.exec_stderr.clone(),
            status: match &self.exec_failure {
                Some(msg) => Err(ClusterError::Remote(msg.clone())),
                None => Ok(()),
            },
        }
    }

    async fn logs(
        &self,
        pod: &str,
        _namespace: &str,
        container: &str,
        previous: bool,
    ) -> Result<String, ClusterError> {
        if previous {
            return Err(ClusterError::Remote(format!(
                "previous terminated container {container:?} in pod {pod:?} not found"
            )));
        }
        Ok(format!("{pod}/{container}: ready\n"))
    }
}

pub fn config() -> Config {
    Config {
        local_address: "127.0.0.1".to_string(),
        request_timeout_secs: 5,
        ..Config::default()
    }
}

pub fn client_with(cluster: Arc<FakeCluster>, config: Config) -> MeshClient {
    kube_fanout::init_logging(log::LevelFilter::Debug);
    MeshClient::new(cluster, config).unwrap()
}

pub fn client(cluster: Arc<FakeCluster>) -> MeshClient {
    client_with(cluster, config())
}
