//! Remote command execution inside sandboxes

use crate::cluster::ClusterClient;
use crate::error::ExecError;
use crate::models::Sandbox;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs commands in a sandbox's container with a hard timeout
#[derive(Clone)]
pub struct RemoteExecutor {
    cluster: Arc<dyn ClusterClient>,
}

impl RemoteExecutor {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    /// Run `command` and return its trimmed stdout
    ///
    /// Returns [`ExecError::Cancelled`] as soon as `cancel` fires and
    /// [`ExecError::Timeout`] once `timeout` elapses, whichever comes first.
    pub async fn exec(
        &self,
        sandbox: &Sandbox,
        command: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let call = self.cluster.exec(
            &sandbox.namespace,
            &sandbox.name,
            &sandbox.container,
            command,
        );

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(output) => output?,
                Err(_) => return Err(ExecError::Timeout(timeout)),
            },
        };

        if output.exit_code != 0 {
            debug!(
                sandbox = %sandbox.name,
                target = %sandbox.target,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "Remote command exited non-zero"
            );
            return Err(ExecError::NonZeroExit {
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(output.stdout.trim().to_string())
    }
}
