//! In-memory [`Cluster`] for unit tests: pod listing and port-forwarding only.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::version::Info;
use tokio::net::{TcpListener, TcpStream};

use crate::cluster::{Cluster, ExecCapture, UpstreamStream};
use crate::error::ClusterError;
use crate::models::k8s::{PodInfo, Selector};

#[derive(Default)]
pub(crate) struct FakeCluster {
    pub pods: Vec<PodInfo>,
    pub list_error: Option<String>,
    /// Where port-forward streams are connected; `None` refuses them.
    pub upstream: Option<SocketAddr>,
    /// Port-forward negotiation never completes.
    pub stall_forwards: bool,
    pub forwards: AtomicUsize,
    pub listed: Mutex<Vec<Selector>>,
}

impl FakeCluster {
    pub fn with_pods(names: &[&str]) -> Self {
        Self {
            pods: names
                .iter()
                .map(|n| PodInfo::new(*n, "istio-system"))
                .collect(),
            ..Self::default()
        }
    }

    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }
}

fn unsupported() -> ClusterError {
    ClusterError::Stream("not supported by the fake cluster".to_string())
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn server_version(&self) -> Result<Info, ClusterError> {
        Err(unsupported())
    }

    async fn list_pods(
        &self,
        _: &str,
        selector: &Selector,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        self.listed.lock().unwrap().push(selector.clone());
        match &self.list_error {
            Some(msg) => Err(ClusterError::Stream(msg.clone())),
            None => Ok(self.pods.clone()),
        }
    }

    async fn port_forward(
        &self,
        pod: &str,
        _: &str,
        _: u16,
    ) -> Result<Box<dyn UpstreamStream>, ClusterError> {
        if self.stall_forwards {
            std::future::pending::<()>().await;
        }
        let addr = self
            .upstream
            .ok_or_else(|| ClusterError::Stream(format!("pod {pod} refused the stream")))?;
        self.forwards.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TcpStream::connect(addr).await?))
    }

    async fn request_raw(&self, _: http::Request<Vec<u8>>) -> Result<Vec<u8>, ClusterError> {
        Err(unsupported())
    }

    async fn exec(&self, _: &str, _: &str, _: &str, _: Vec<String>) -> ExecCapture {
        ExecCapture {
            stdout: String::new(),
            stderr: String::new(),
            status: Err(unsupported()),
        }
    }

    async fn logs(&self, _: &str, _: &str, _: &str, _: bool) -> Result<String, ClusterError> {
        Err(unsupported())
    }
}

/// TCP server echoing every byte back.
pub(crate) async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = conn.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}
