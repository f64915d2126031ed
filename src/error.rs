use std::time::Duration;

use crate::consul::ConsulError;
use crate::vault::VaultError;

/// Errors raised while bootstrapping the federated clusters.
///
/// Every variant is fatal to the run; the only non-fatal branch (the
/// multi-cluster gate) is reported as [`crate::federation::Outcome::Skipped`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("consul error: {0}")]
    Consul(#[from] ConsulError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// An external binary (kubectl, helm) exited unsuccessfully.
    #[error("command failed: {command} - {message}")]
    CommandFailed { command: String, message: String },

    #[error("timed out waiting for {what} after {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error("tls error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// An external system answered, but not in the shape we need.
    #[error("unexpected state: {0}")]
    Unexpected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    pub(crate) fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout,
        }
    }
}
