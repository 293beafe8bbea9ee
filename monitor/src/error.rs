//! Monitor-specific error types.
//!
//! This module defines error types specific to the job monitor
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use kube::config::KubeconfigError;
use thiserror::Error;

/// Errors that can occur while setting up or running the job watch.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Kubeconfig could not be located, read, or parsed
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// The watched job ended in failure
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// The job did not complete within the configured wait bound
    #[error("Timed out after {0}s waiting for job completion")]
    TimedOut(u64),
}
