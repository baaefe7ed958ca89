use std::collections::BTreeMap;

use http::Method;
use tokio_util::sync::CancellationToken;

use crate::client::{cancellable, MeshClient};
use crate::error::{Error, Result};
use crate::fanout::{dispatch_all, dispatch_until_error, AggregateResult};
use crate::models::k8s::{Selector, Target};

// ── helpers ───────────────────────────────────────────────────────────────────

/// Splits `path?query` into the path and its decoded query pairs.
fn split_path(path: &str) -> (&str, Vec<(String, String)>) {
    match path.split_once('?') {
        Some((path, query)) => (
            path,
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        ),
        None => (path, Vec::new()),
    }
}

/// Builds a request against the pod's proxy subresource:
/// `/api/v1/namespaces/<ns>/pods/<name>:<port>/proxy/<path>?<query>`.
///
/// Query parameters found in `path` are re-encoded onto the proxy URL.
pub fn proxy_request(
    target: &Target,
    method: Method,
    path: &str,
    body: Vec<u8>,
) -> Result<http::Request<Vec<u8>>> {
    let (path, query) = split_path(path);
    let mut uri = format!(
        "/api/v1/namespaces/{}/pods/{}:{}/proxy/{}",
        target.namespace,
        target.name,
        target.port,
        path.trim_start_matches('/')
    );
    if !query.is_empty() {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&query)
            .finish();
        uri.push('?');
        uri.push_str(&encoded);
    }

    http::Request::builder()
        .method(method)
        .uri(uri.as_str())
        .body(body)
        .map_err(|e| Error::Parse(format!("invalid proxy request {uri}: {e}")))
}

// ── commands ──────────────────────────────────────────────────────────────────

impl MeshClient {
    /// One request through the pod's proxy subresource.
    pub async fn proxy_do(
        &self,
        target: &Target,
        method: Method,
        path: &str,
        body: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.guarded("proxy request", cancel, self.proxy_call(target, method, path, body))
            .await
    }

    pub(crate) async fn proxy_get(&self, target: &Target, path: &str) -> Result<Vec<u8>> {
        self.proxy_call(target, Method::GET, path, Vec::new()).await
    }

    async fn proxy_call(
        &self,
        target: &Target,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let request = proxy_request(target, method, path, body)?;
        log::debug!("proxy: {} {}", request.method(), request.uri());
        self.cluster
            .request_raw(request)
            .await
            .map_err(|source| Error::Proxy {
                target: target.to_string(),
                source,
            })
    }

    fn discovery_selector(&self) -> Selector {
        Selector::new()
            .labels(self.config.discovery_selector.as_str())
            .fields(self.config.running_field_selector.as_str())
    }

    /// GETs `path` from every running discovery instance of `revision`.
    ///
    /// Every instance is attempted. Non-empty responses are keyed by pod name;
    /// failures are kept on the result and only fail the call when no instance
    /// answered.
    pub async fn all_discovery_do(
        &self,
        namespace: &str,
        path: &str,
        revision: &str,
        cancel: &CancellationToken,
    ) -> Result<AggregateResult<Vec<u8>>> {
        let pilots = self
            .resolve(namespace, self.discovery_selector(), revision, cancel)
            .await?;
        let targets = pilots.targets(self.config.discovery_port);

        let client = self;
        let fanout = dispatch_all(&targets, self.config.max_concurrency, move |target| async move {
            client
                .deadline("discovery request", client.proxy_get(&target, path))
                .await
        });
        let aggregate = cancellable("discovery fan-out", cancel, async { Ok(fanout.await) }).await?;

        if let Some(errors) = aggregate.errors() {
            log::warn!(
                "discovery: {} of {} instance(s) failed",
                errors.len(),
                targets.len()
            );
        }
        aggregate.finish()
    }

    /// Like [`MeshClient::all_discovery_do`], but stops at the first instance
    /// that fails and returns that error.
    pub async fn all_discovery_do_strict(
        &self,
        namespace: &str,
        path: &str,
        revision: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let pilots = self
            .resolve(namespace, self.discovery_selector(), revision, cancel)
            .await?;
        let targets = pilots.targets(self.config.discovery_port);

        let client = self;
        cancellable(
            "discovery fan-out",
            cancel,
            dispatch_until_error(&targets, move |target| async move {
                client
                    .deadline("discovery request", client.proxy_get(&target, path))
                    .await
            }),
        )
        .await
    }
}
