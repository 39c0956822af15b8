//! Controller-specific error types.
//!
//! Classifies failures by how the reconcile loop reacts to them: transient
//! infrastructure errors and conflicts requeue with backoff, drain-pending is
//! retryable by definition, and a node without an internal address is
//! persistent until the platform reports one.

use fabric_render::RenderError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the fabric controllers.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Render collaborator error
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Object body serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Node has no InternalIP address; persistent until the platform reports one
    #[error("node {0} has no internal address")]
    NodeAddressMissing(String),

    /// Leader pod lookup did not return exactly one pod
    #[error("leader lookup for label {label} matched {found} pods, expected 1")]
    LeaderLookup {
        /// Label the lookup selected on
        label: String,
        /// Number of pods that matched
        found: usize,
    },

    /// Remote command failed inside the target container
    #[error("remote command failed: {0}")]
    Exec(String),

    /// Custom resource instances still exist; retry until the drain completes
    #[error("waiting for {remaining} custom resource instances to be deleted")]
    DrainPending {
        /// Instances still present across all definitions
        remaining: usize,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True for errors that a later reconcile attempt can clear on its own.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ControllerError::NodeAddressMissing(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_pending_retries_and_missing_address_does_not() {
        assert!(ControllerError::DrainPending { remaining: 2 }.is_retryable());
        assert!(ControllerError::Exec("kick failed".to_string()).is_retryable());
        assert!(!ControllerError::NodeAddressMissing("worker-1".to_string()).is_retryable());
    }
}
