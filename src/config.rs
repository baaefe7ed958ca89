use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Settings for resolving control-plane pods and talking to them.
///
/// Every field has a default; a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Address tunnels bind to when the caller passes an empty one.
    pub local_address: String,
    pub discovery_port: u16,
    pub version_port: u16,
    pub envoy_admin_port: u16,
    /// Label carrying the control-plane revision of a pod.
    pub revision_label: String,
    pub discovery_selector: String,
    pub component_selector: String,
    /// Label whose value names the component in version reports.
    pub component_label: String,
    pub running_field_selector: String,
    pub tunnel_ready_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Upper bound on in-flight requests during a collect-all fan-out.
    pub max_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_address: "localhost".to_string(),
            discovery_port: 8080,
            version_port: 15014,
            envoy_admin_port: 15000,
            revision_label: "istio.io/rev".to_string(),
            discovery_selector: "app=istiod".to_string(),
            component_selector:
                "istio,istio!=ingressgateway,istio!=egressgateway,istio!=ilbgateway".to_string(),
            component_label: "istio".to_string(),
            running_field_selector: "status.phase=Running".to_string(),
            tunnel_ready_timeout_secs: 5,
            request_timeout_secs: 30,
            max_concurrency: 8,
        }
    }
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Reads `<config dir>/kube-fanout/config.yaml` when it exists, otherwise
    /// returns the defaults.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => {
                log::info!("config: loading {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn tunnel_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_ready_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max-concurrency must be at least 1".into()));
        }
        if self.revision_label.is_empty() {
            return Err(Error::Config("revision-label must not be empty".into()));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("kube-fanout").join("config.yaml"))
}
