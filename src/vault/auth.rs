//! Kubernetes auth method setup.

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::vault::{VaultClient, VaultError};

/// A role under `auth/<path>/role/<name>` binding service accounts to policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KubernetesRole {
    #[serde(skip)]
    pub name: String,
    pub bound_service_account_names: String,
    pub bound_service_account_namespaces: String,
    /// Comma separated policy names.
    pub policies: String,
    pub ttl: String,
}

impl KubernetesRole {
    pub fn new(
        name: impl Into<String>,
        service_account: impl Into<String>,
        namespace: impl Into<String>,
        policies: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bound_service_account_names: service_account.into(),
            bound_service_account_namespaces: namespace.into(),
            policies: policies.into(),
            ttl: "24h".to_string(),
        }
    }
}

/// Writes `auth/<path>/config`.
///
/// Without a reviewer JWT Vault falls back to its own pod's service account
/// token, which only works for the cluster Vault runs in.
pub async fn configure_kubernetes_auth(
    client: &VaultClient,
    auth_path: &str,
    kubernetes_host: &str,
    token_reviewer_jwt: Option<&str>,
    kubernetes_ca_cert: Option<&str>,
) -> Result<(), VaultError> {
    let mut config = json!({ "kubernetes_host": kubernetes_host });
    if let Some(jwt) = token_reviewer_jwt {
        config["token_reviewer_jwt"] = json!(jwt);
    }
    if let Some(ca) = kubernetes_ca_cert {
        config["kubernetes_ca_cert"] = json!(ca);
    }
    info!(auth_path = %auth_path, host = %kubernetes_host, "configuring kubernetes auth");
    client
        .write(&format!("auth/{}/config", auth_path), config)
        .await
        .map(|_| ())
}

pub async fn write_kubernetes_role(
    client: &VaultClient,
    auth_path: &str,
    role: &KubernetesRole,
) -> Result<(), VaultError> {
    info!(
        auth_path = %auth_path,
        role = %role.name,
        service_account = %role.bound_service_account_names,
        "writing kubernetes auth role"
    );
    client
        .write(
            &format!("auth/{}/role/{}", auth_path, role.name),
            serde_json::to_value(role)?,
        )
        .await
        .map(|_| ())
}
