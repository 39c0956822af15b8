//! Remote command execution inside database pods.
//!
//! Eviction scripts, chassis cleanup and health probes all run as shell
//! commands inside the central database container of a leader pod, over the
//! pod exec websocket transport. Execution is synchronous from the caller's
//! point of view and inherits the invoking reconcile's lifetime.

use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::AttachParams;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::ControllerError;
use fabric_api::CENTRAL_CONTAINER_NAME;

/// Runs shell commands inside the central container of fabric pods.
#[derive(Clone)]
pub struct RemoteCommandExecutor {
    pods: Api<Pod>,
    container: String,
}

impl RemoteCommandExecutor {
    /// Creates an executor targeting the central database container of pods
    /// in the given namespace.
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            container: CENTRAL_CONTAINER_NAME.to_string(),
        }
    }

    /// Runs `command` through `/bin/sh -c` inside the target pod.
    ///
    /// Returns captured stdout on success. A non-Success exec status or a
    /// transport failure yields [`ControllerError::Exec`] carrying whatever
    /// the command wrote to stderr.
    pub async fn run(&self, pod_name: &str, command: &str) -> Result<String, ControllerError> {
        debug!(pod = pod_name, command, "executing remote command");

        let params = AttachParams::default()
            .container(&self.container)
            .stdin(false)
            .stdout(true)
            .stderr(true)
            .tty(false);

        let mut attached = self
            .pods
            .exec(pod_name, ["/bin/sh", "-c", command], &params)
            .await?;

        let mut stdout_reader = attached
            .stdout()
            .ok_or_else(|| ControllerError::Exec("stdout stream not attached".to_string()))?;
        let mut stderr_reader = attached
            .stderr()
            .ok_or_else(|| ControllerError::Exec("stderr stream not attached".to_string()))?;
        let status_future = attached.take_status();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        tokio::try_join!(
            stdout_reader.read_to_end(&mut stdout),
            stderr_reader.read_to_end(&mut stderr),
        )
        .map_err(|e| ControllerError::Exec(format!("reading exec streams: {e}")))?;

        let status = match status_future {
            Some(fut) => fut.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| ControllerError::Exec(format!("joining exec session: {e}")))?;

        match status {
            Some(status) if status.status.as_deref() == Some("Success") => {
                Ok(String::from_utf8_lossy(&stdout).into_owned())
            }
            Some(status) => Err(ControllerError::Exec(format!(
                "command exited with status {}: {} (stderr: {})",
                status.status.unwrap_or_default(),
                status.message.unwrap_or_default(),
                String::from_utf8_lossy(&stderr),
            ))),
            None => Err(ControllerError::Exec(format!(
                "exec session ended without a status (stderr: {})",
                String::from_utf8_lossy(&stderr),
            ))),
        }
    }
}
