use std::collections::HashMap;
use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::cluster::KubeCluster;
use crate::error::{Error, Result};
use crate::models::k8s::KubeContext;

// ── helpers ───────────────────────────────────────────────────────────────────

/// `~/.kube/config`, used when KUBECONFIG is unset.
fn default_kubeconfig_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".kube").join("config"))
}

/// Loads the kubeconfig the way kubectl does: every file listed in KUBECONFIG
/// merged, or `~/.kube/config`.
pub fn load_kubeconfig() -> Result<Kubeconfig> {
    let kube_env = std::env::var("KUBECONFIG").unwrap_or_default();
    if !kube_env.is_empty() {
        log::debug!("kubeconfig: KUBECONFIG = {kube_env:?}");
        return Kubeconfig::read()
            .map_err(|e| Error::Config(format!("failed to read kubeconfig: {e}")));
    }

    let path = default_kubeconfig_path()
        .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))?;
    log::debug!("kubeconfig: reading {}", path.display());
    Kubeconfig::read_from(&path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))
}

/// Lists every context, flagging the current one.
pub fn list_contexts(kubeconfig: &Kubeconfig) -> Vec<KubeContext> {
    let current = kubeconfig.current_context.clone().unwrap_or_default();

    // cluster-name -> server URL
    let cluster_servers: HashMap<&str, &str> = kubeconfig
        .clusters
        .iter()
        .filter_map(|nc| {
            let server = nc.cluster.as_ref()?.server.as_deref()?;
            Some((nc.name.as_str(), server))
        })
        .collect();

    kubeconfig
        .contexts
        .iter()
        .filter_map(|named| {
            let ctx = named.context.as_ref()?;
            Some(KubeContext {
                name: named.name.clone(),
                cluster: ctx.cluster.clone(),
                user: ctx.user.clone().unwrap_or_default(),
                namespace: ctx.namespace.clone(),
                is_active: named.name == current,
                server_url: cluster_servers
                    .get(ctx.cluster.as_str())
                    .map(|s| s.to_string()),
            })
        })
        .collect()
}

/// Picks `requested`, falling back to the current context; the result must
/// name a context that exists.
pub fn context_name(kubeconfig: &Kubeconfig, requested: Option<&str>) -> Result<String> {
    let name = requested
        .map(str::to_string)
        .or_else(|| kubeconfig.current_context.clone())
        .ok_or_else(|| {
            Error::Config("no context specified and no current context in kubeconfig".into())
        })?;
    if !kubeconfig.contexts.iter().any(|c| c.name == name) {
        return Err(Error::Config(format!("context {name:?} not found in kubeconfig")));
    }
    Ok(name)
}

// ── commands ──────────────────────────────────────────────────────────────────

/// Builds a cluster handle for `context` (or the current context).
pub async fn connect(context: Option<&str>) -> Result<KubeCluster> {
    let kubeconfig = load_kubeconfig()?;
    let name = context_name(&kubeconfig, context)?;
    log::info!("kubeconfig: connecting with context {name}");

    let options = KubeConfigOptions {
        context: Some(name.clone()),
        ..KubeConfigOptions::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| Error::Config(format!("invalid context {name:?}: {e}")))?;
    let client = Client::try_from(config)
        .map_err(|e| Error::Config(format!("failed to build client for {name:?}: {e}")))?;
    Ok(KubeCluster::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: prod
clusters:
- name: prod-cluster
  cluster:
    server: https://prod.example.com:6443
- name: dev-cluster
  cluster:
    server: https://dev.example.com:6443
contexts:
- name: prod
  context:
    cluster: prod-cluster
    user: admin
    namespace: istio-system
- name: dev
  context:
    cluster: dev-cluster
    user: dev
users: []
"#;

    fn kubeconfig() -> Kubeconfig {
        Kubeconfig::from_yaml(KUBECONFIG).unwrap()
    }

    #[test]
    fn contexts_are_listed_with_servers() {
        let contexts = list_contexts(&kubeconfig());
        assert_eq!(contexts.len(), 2);
        let prod = contexts.iter().find(|c| c.name == "prod").unwrap();
        assert!(prod.is_active);
        assert_eq!(prod.server_url.as_deref(), Some("https://prod.example.com:6443"));
        assert_eq!(prod.namespace.as_deref(), Some("istio-system"));
        let dev = contexts.iter().find(|c| c.name == "dev").unwrap();
        assert!(!dev.is_active);
        assert_eq!(dev.user, "dev");
    }

    #[test]
    fn current_context_is_the_default() {
        assert_eq!(context_name(&kubeconfig(), None).unwrap(), "prod");
        assert_eq!(context_name(&kubeconfig(), Some("dev")).unwrap(), "dev");
    }

    #[test]
    fn unknown_context_is_a_config_error() {
        let err = context_name(&kubeconfig(), Some("staging")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
