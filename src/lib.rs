//! Address logical cluster targets ("the control plane", "this pod's Envoy")
//! instead of network endpoints: resolve them to pods, tunnel or proxy into
//! each, and fan requests out while tolerating partial failure.

pub mod client;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod fanout;
pub mod models;
pub mod tunnel;

#[cfg(test)]
mod fake;

pub use client::MeshClient;
pub use cluster::{Cluster, ExecCapture, KubeCluster, UpstreamStream};
pub use commands::exec::ExecOutput;
pub use config::Config;
pub use error::{ClusterError, Error, ErrorKind, Result};
pub use fanout::{AggregateResult, CombinedError};
pub use models::k8s::{PodInfo, ResolvedSet, Selector, Target};
pub use models::version::{ParsedVersion, VersionReport};
pub use tokio_util::sync::CancellationToken;
pub use tunnel::Tunnel;

/// Installs an `env_logger` backend for the `log` facade. `RUST_LOG`
/// overrides `level`; later calls are no-ops.
pub fn init_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}
