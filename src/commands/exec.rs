use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::MeshClient;
use crate::error::{Error, Result};

/// Output of a command that completed successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Splits a command line with shell quoting rules, so `sh -c "a b"` stays
/// three arguments.
fn command_fields(command: &str) -> Result<Vec<String>> {
    let fields = shell_words::split(command)
        .map_err(|e| Error::Parse(format!("invalid command {command:?}: {e}")))?;
    if fields.is_empty() {
        return Err(Error::Parse("empty command".to_string()));
    }
    Ok(fields)
}

impl MeshClient {
    /// Runs `command` in `container` of `pod` with stdin disabled.
    ///
    /// stdout and stderr are captured separately. When the session fails the
    /// error message carries the captured stderr and the error keeps whatever
    /// stdout was produced.
    pub async fn pod_exec(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        let fields = command_fields(command)?;
        log::debug!("exec: {pod}/{namespace} [{container}] {fields:?}");

        let capture = self
            .guarded("pod exec", cancel, async {
                Ok(self.cluster.exec(pod, namespace, container, fields).await)
            })
            .await?;

        match capture.status {
            Ok(()) => Ok(ExecOutput {
                stdout: capture.stdout,
                stderr: capture.stderr,
            }),
            Err(cause) => Err(Error::RemoteExec {
                pod: pod.to_string(),
                namespace: namespace.to_string(),
                container: container.to_string(),
                cause: cause.to_string(),
                stdout: capture.stdout,
                stderr: capture.stderr,
            }),
        }
    }
}
