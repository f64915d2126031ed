//! PKI secrets engine operations.

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::vault::common::data_str;
use crate::vault::{VaultClient, VaultError};

/// Mounts a PKI engine at `path` with the given maximum lease TTL.
pub async fn mount_pki(client: &VaultClient, path: &str, max_lease_ttl: &str) -> Result<(), VaultError> {
    client
        .mount(path, "pki", Some(json!({ "max_lease_ttl": max_lease_ttl })))
        .await
}

/// Generates a self-signed root certificate inside Vault and returns its PEM.
pub async fn generate_root(
    client: &VaultClient,
    path: &str,
    common_name: &str,
    ttl: &str,
) -> Result<String, VaultError> {
    let resp = client
        .write(
            &format!("{}/root/generate/internal", path),
            json!({ "common_name": common_name, "ttl": ttl }),
        )
        .await?;
    let cert = data_str(&resp, "certificate").unwrap_or_default().to_string();
    info!(path = %path, common_name = %common_name, "generated root CA");
    Ok(cert)
}

/// Issuing role under `<mount>/roles/<name>`. Vault takes the booleans as strings here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkiRole {
    #[serde(skip)]
    pub name: String,
    /// Comma separated.
    pub allowed_domains: String,
    pub allow_bare_domains: String,
    pub allow_localhost: String,
    pub allow_subdomains: String,
    pub generate_lease: String,
    pub max_ttl: String,
}

impl PkiRole {
    pub fn new(name: impl Into<String>, allowed_domains: &[String], max_ttl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_domains: allowed_domains.join(","),
            allow_bare_domains: "true".to_string(),
            allow_localhost: "true".to_string(),
            allow_subdomains: "true".to_string(),
            generate_lease: "true".to_string(),
            max_ttl: max_ttl.into(),
        }
    }
}

/// Writes the role and returns the path certificates are issued from.
pub async fn write_role(client: &VaultClient, mount: &str, role: &PkiRole) -> Result<String, VaultError> {
    client
        .write(
            &format!("{}/roles/{}", mount, role.name),
            serde_json::to_value(role)?,
        )
        .await?;
    Ok(format!("{}/issue/{}", mount, role.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_mount_and_generate_root() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/mounts/pki"))
            .and(body_json(json!({"type": "pki", "config": {"max_lease_ttl": "87600h"}})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/pki/root/generate/internal"))
            .and(body_json(json!({"common_name": "Consul CA", "ttl": "87600h"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"certificate": "-----BEGIN CERTIFICATE-----"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "root").unwrap();
        mount_pki(&client, "pki", "87600h").await.unwrap();
        let cert = generate_root(&client, "pki", "Consul CA", "87600h").await.unwrap();
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn test_write_role_returns_issue_path() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/pki/roles/consul-server-dc1"))
            .and(body_json(json!({
                "allowed_domains": "dc1.consul,rel-consul-server",
                "allow_bare_domains": "true",
                "allow_localhost": "true",
                "allow_subdomains": "true",
                "generate_lease": "true",
                "max_ttl": "1h"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "root").unwrap();
        let role = PkiRole::new(
            "consul-server-dc1",
            &["dc1.consul".to_string(), "rel-consul-server".to_string()],
            "1h",
        );
        let issue = write_role(&client, "pki", &role).await.unwrap();
        assert_eq!(issue, "pki/issue/consul-server-dc1");
    }
}
