// Cluster-facing value types shared by the resolver, tunnels and fan-out.
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

pub const LABEL_SELECTOR: &str = "labelSelector";
pub const FIELD_SELECTOR: &str = "fieldSelector";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
    pub is_active: bool,
    /// API server URL of the context's cluster
    pub server_url: Option<String>,
}

/// The subset of a pod the resolver cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub phase: String,
}

impl PodInfo {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            phase: "Running".to_string(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

impl From<&Pod> for PodInfo {
    fn from(pod: &Pod) -> Self {
        Self {
            name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
            labels: pod.labels().clone(),
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_default(),
        }
    }
}

/// A single addressable pod/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub name: String,
    pub namespace: String,
    pub port: u16,
}

impl Target {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            port,
        }
    }

    pub fn for_pod(pod: &PodInfo, port: u16) -> Self {
        Self::new(pod.name.clone(), pod.namespace.clone(), port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.name, self.namespace, self.port)
    }
}

/// Query parameters used to filter pods (`labelSelector`, `fieldSelector`, ...).
///
/// Kept in a `BTreeMap` so the rendered query is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    params: BTreeMap<String, String>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.params.insert(LABEL_SELECTOR.to_string(), selector.into());
        self
    }

    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.params.insert(FIELD_SELECTOR.to_string(), selector.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn label_selector(&self) -> Option<&str> {
        self.get(LABEL_SELECTOR)
    }

    pub fn field_selector(&self) -> Option<&str> {
        self.get(FIELD_SELECTOR)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// ANDs `<label>=<revision>` into the label selector. An empty revision
    /// leaves the selector untouched.
    pub fn with_revision(mut self, label: &str, revision: &str) -> Self {
        if revision.is_empty() {
            return self;
        }
        let constraint = format!("{label}={revision}");
        let merged = match self.params.get(LABEL_SELECTOR) {
            Some(existing) if !existing.is_empty() => format!("{existing},{constraint}"),
            _ => constraint,
        };
        self.params.insert(LABEL_SELECTOR.to_string(), merged);
        self
    }
}

impl From<BTreeMap<String, String>> for Selector {
    fn from(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&rendered.join("&"))
    }
}

/// Pods matching a selector at one point in time. Never empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSet {
    pods: Vec<PodInfo>,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedSet {
    /// Returns `None` for an empty pod list; emptiness is reported by the
    /// resolver as an error instead.
    pub fn new(pods: Vec<PodInfo>) -> Option<Self> {
        if pods.is_empty() {
            return None;
        }
        Some(Self {
            pods,
            resolved_at: Utc::now(),
        })
    }

    pub fn pods(&self) -> &[PodInfo] {
        &self.pods
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Targets for every pod at `port`, in resolved order.
    pub fn targets(&self, port: u16) -> Vec<Target> {
        self.pods.iter().map(|p| Target::for_pod(p, port)).collect()
    }

    pub fn into_pods(self) -> Vec<PodInfo> {
        self.pods
    }
}
