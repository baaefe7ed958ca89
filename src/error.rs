//! Error types for kube-fanout

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::fanout::CombinedError;

/// Failure reported by the cluster collaborator (pod listing, streams, proxy).
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("{0}")]
    Remote(String),
}

/// Coarse classification of [`Error`], used to report "nothing is there"
/// separately from "something is broken".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Resolution,
    TunnelSetup,
    Transport,
    RemoteExec,
    Parse,
    Cancelled,
    Config,
    Aggregate,
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("no matching pods in namespace {namespace:?} for {selector}")]
    NoMatchingPods { namespace: String, selector: String },

    #[error("unable to retrieve pods in namespace {namespace:?}: {source}")]
    ListPods {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to bind local listener on {address}: {source}")]
    TunnelBind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("local listener on {address} not ready after {timeout:?}")]
    TunnelBindTimeout { address: String, timeout: Duration },

    #[error("failed to open upstream stream to {target}: {source}")]
    TunnelUpstream {
        target: String,
        #[source]
        source: ClusterError,
    },

    #[error("upstream stream to {target} not ready after {timeout:?}")]
    TunnelUpstreamTimeout { target: String, timeout: Duration },

    #[error("proxy request to {target} failed: {source}")]
    Proxy {
        target: String,
        #[source]
        source: ClusterError,
    },

    #[error("failure running port forward process against {target}: {source}")]
    Tunnel {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unable to retrieve logs for {pod}/{namespace}: {source}")]
    Logs {
        pod: String,
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to query the API server version: {source}")]
    ServerVersion {
        #[source]
        source: ClusterError,
    },

    #[error("{}", exec_message(.pod, .namespace, .container, .cause, .stderr))]
    RemoteExec {
        pod: String,
        namespace: String,
        container: String,
        cause: String,
        /// Output the command produced before failing.
        stdout: String,
        stderr: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Combined(#[from] CombinedError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoMatchingPods { .. } | Error::ListPods { .. } => ErrorKind::Resolution,
            Error::TunnelBind { .. }
            | Error::TunnelBindTimeout { .. }
            | Error::TunnelUpstream { .. }
            | Error::TunnelUpstreamTimeout { .. } => ErrorKind::TunnelSetup,
            Error::Proxy { .. }
            | Error::Tunnel { .. }
            | Error::Logs { .. }
            | Error::ServerVersion { .. }
            | Error::Timeout { .. } => ErrorKind::Transport,
            Error::RemoteExec { .. } => ErrorKind::RemoteExec,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
            Error::Combined(_) => ErrorKind::Aggregate,
        }
    }

    /// True when the failure means no pod matched, as opposed to a broken
    /// transport or API call.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoMatchingPods { .. })
    }
}

fn exec_message(
    pod: &str,
    namespace: &str,
    container: &str,
    cause: &str,
    stderr: &str,
) -> String {
    let mut msg = format!("error exec'ing into {pod}/{namespace} {container} container: {cause}");
    if !stderr.is_empty() {
        msg.push('\n');
        msg.push_str(stderr);
    }
    msg
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Resolution => "resolution",
            ErrorKind::TunnelSetup => "tunnel setup",
            ErrorKind::Transport => "transport",
            ErrorKind::RemoteExec => "remote exec",
            ErrorKind::Parse => "parse",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
