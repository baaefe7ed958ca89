//! Local-to-pod port forwarding.
//!
//! A [`Tunnel`] binds a local TCP listener and owns a background task that,
//! for each accepted connection, opens an upstream stream to the target pod
//! port and splices bytes both ways until either side closes.
//!
//! # Lifecycle
//! ```text
//! open()  -> listener bound, first upstream negotiated, forwarder spawned
//! close() -> stop accepting, cancel in-flight splices, wait for them
//! ```
//! `close` is idempotent. Dropping an unclosed tunnel cancels and aborts the
//! forwarder without waiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::cluster::{Cluster, UpstreamStream};
use crate::error::{Error, Result};
use crate::models::k8s::Target;

pub const DEFAULT_LOCAL_ADDRESS: &str = "localhost";

/// Delay before accepting again after a failed accept (e.g. out of fds).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// An open forward from a local address to one pod port.
pub struct Tunnel {
    target: Target,
    address: SocketAddr,
    shutdown: CancellationToken,
    forwarder: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("target", &self.target)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Tunnel {
    /// Binds `local_address:local_port` (`0` picks a free port) and starts
    /// forwarding to `target`.
    ///
    /// Returns once the listener is bound, so [`Tunnel::address`] can be
    /// connected to straight away. Binding and the first upstream negotiation
    /// are each bounded by `ready_timeout`.
    pub async fn open(
        cluster: Arc<dyn Cluster>,
        target: Target,
        local_address: &str,
        local_port: u16,
        ready_timeout: Duration,
    ) -> Result<Self> {
        let host = if local_address.is_empty() {
            DEFAULT_LOCAL_ADDRESS
        } else {
            local_address
        };
        let requested = format!("{host}:{local_port}");

        let listener =
            match tokio::time::timeout(ready_timeout, TcpListener::bind((host, local_port))).await
            {
                Ok(Ok(listener)) => listener,
                Ok(Err(source)) => {
                    return Err(Error::TunnelBind {
                        address: requested,
                        source,
                    })
                }
                Err(_) => {
                    return Err(Error::TunnelBindTimeout {
                        address: requested,
                        timeout: ready_timeout,
                    })
                }
            };
        let address = listener.local_addr().map_err(|source| Error::TunnelBind {
            address: requested.clone(),
            source,
        })?;

        // An unreachable pod should fail here rather than on first use.
        let negotiate = cluster.port_forward(&target.name, &target.namespace, target.port);
        let primed = match tokio::time::timeout(ready_timeout, negotiate).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(Error::TunnelUpstream {
                    target: target.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(Error::TunnelUpstreamTimeout {
                    target: target.to_string(),
                    timeout: ready_timeout,
                })
            }
        };

        let shutdown = CancellationToken::new();
        let forwarder = tokio::spawn(forward_loop(
            listener,
            cluster,
            target.clone(),
            shutdown.clone(),
            primed,
        ));

        log::info!("tunnel: forwarding {address} -> {target}");
        Ok(Self {
            target,
            address,
            shutdown,
            forwarder: Some(forwarder),
        })
    }

    /// The bound local `host:port`.
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn local_port(&self) -> u16 {
        self.address.port()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_closed(&self) -> bool {
        self.forwarder.is_none()
    }

    /// Stops accepting, tears down in-flight connections and waits for the
    /// forwarder to finish. Calling it again is a no-op.
    pub async fn close(&mut self) {
        self.shutdown.cancel();
        let Some(forwarder) = self.forwarder.take() else {
            return;
        };
        if let Err(e) = forwarder.await {
            log::warn!("tunnel: forwarder for {} ended abnormally: {e}", self.target);
        }
        log::info!("tunnel: closed {} -> {}", self.address, self.target);
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(forwarder) = self.forwarder.take() {
            log::debug!("tunnel: {} dropped without close", self.target);
            forwarder.abort();
        }
    }
}

// ── forwarding ────────────────────────────────────────────────────────────────

async fn forward_loop(
    listener: TcpListener,
    cluster: Arc<dyn Cluster>,
    target: Target,
    shutdown: CancellationToken,
    primed: Box<dyn UpstreamStream>,
) {
    let mut primed = Some(primed);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((conn, peer)) => {
                    log::debug!("tunnel: {peer} connected, forwarding to {target}");
                    connections.spawn(forward_connection(
                        conn,
                        primed.take(),
                        cluster.clone(),
                        target.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    log::warn!("tunnel: accept for {target} failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = connections.join_next() => {
                if let Err(e) = joined {
                    log::warn!("tunnel: connection task for {target} failed: {e}");
                }
            }
        }
    }

    drop(listener);
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            log::warn!("tunnel: connection task for {target} failed: {e}");
        }
    }
}

async fn forward_connection(
    mut local: TcpStream,
    primed: Option<Box<dyn UpstreamStream>>,
    cluster: Arc<dyn Cluster>,
    target: Target,
    shutdown: CancellationToken,
) {
    let mut upstream = match primed {
        Some(stream) => stream,
        None => match cluster
            .port_forward(&target.name, &target.namespace, target.port)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("tunnel: upstream to {target} failed: {e}");
                return;
            }
        },
    };

    tokio::select! {
        _ = shutdown.cancelled() => {
            log::debug!("tunnel: connection to {target} cancelled");
        }
        copied = tokio::io::copy_bidirectional(&mut local, &mut upstream) => match copied {
            Ok((sent, received)) => {
                log::debug!("tunnel: {target} done, {sent} bytes up, {received} bytes down");
            }
            Err(e) => log::debug!("tunnel: {target} connection ended: {e}"),
        }
    }
}
