//! Client implementation for Vault API interactions.
//!
//! Paths are given relative to `/v1/`, e.g. `sys/mounts/pki`.

use std::time::Duration;

use reqwest::{Certificate, Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::vault::common::check_response;
use crate::vault::VaultError;

/// Client for interacting with the Vault HTTP API.
#[derive(Clone)]
pub struct VaultClient {
    /// Base URL of the Vault server
    pub addr: String,
    token: String,
    client: Client,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    /// Creates a client that trusts the system roots only.
    pub fn new(addr: &str, token: &str) -> Result<Self, VaultError> {
        Self::build(addr, token, Client::builder())
    }

    /// Creates a client that additionally trusts `ca_pem`.
    pub fn with_ca_pem(addr: &str, token: &str, ca_pem: &str) -> Result<Self, VaultError> {
        let ca = Certificate::from_pem(ca_pem.as_bytes())?;
        Self::build(addr, token, Client::builder().add_root_certificate(ca))
    }

    fn build(addr: &str, token: &str, builder: reqwest::ClientBuilder) -> Result<Self, VaultError> {
        let client = builder
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VaultError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    pub fn set_token(&mut self, token: &str) {
        self.token = token.to_string();
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Reads a path. A 404 is reported as `None`.
    pub async fn read(&self, path: &str) -> Result<Option<Value>, VaultError> {
        match self.request(Method::GET, path, None).await {
            Ok(value) => Ok(Some(value)),
            Err(VaultError::HttpStatus(404, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes `body` to a path (HTTP PUT, like `vault write`).
    pub async fn write(&self, path: &str, body: Value) -> Result<Value, VaultError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Mounts a secrets engine. `config` is the optional mount tuning block.
    pub async fn mount(&self, path: &str, engine: &str, config: Option<Value>) -> Result<(), VaultError> {
        let mut body = json!({ "type": engine });
        if let Some(config) = config {
            body["config"] = config;
        }
        info!(path = %path, engine = %engine, "mounting secrets engine");
        self.request(Method::POST, &format!("sys/mounts/{}", path), Some(body))
            .await
            .map(|_| ())
    }

    /// Enables an auth method. An already enabled path is not an error.
    pub async fn enable_auth(&self, path: &str, method: &str) -> Result<(), VaultError> {
        info!(path = %path, method = %method, "enabling auth method");
        match self
            .request(
                Method::POST,
                &format!("sys/auth/{}", path),
                Some(json!({ "type": method })),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_path_in_use() => {
                debug!(path = %path, "auth method already enabled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Creates or replaces an ACL policy.
    pub async fn put_policy(&self, name: &str, rules: &str) -> Result<(), VaultError> {
        debug!(policy = %name, "writing policy");
        self.request(
            Method::PUT,
            &format!("sys/policies/acl/{}", name),
            Some(json!({ "policy": rules })),
        )
        .await
        .map(|_| ())
    }

    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, VaultError> {
        let url = self.url(path);
        let mut request = self.client.request(method, &url);

        if !self.token.is_empty() {
            request = request.header("X-Vault-Token", &self.token);
        }

        if let Some(json_body) = body {
            request = request.json(&json_body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VaultError::Network(format!("Request to {} failed: {}", url, e)))?;

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Sealed(body));
        }

        check_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_write_sends_token_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/consul/data/secret/gossip"))
            .and(header("X-Vault-Token", "root"))
            .and(body_json(json!({"data": {"gossip": "key"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"version": 1}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "root").unwrap();
        let resp = client
            .write("consul/data/secret/gossip", json!({"data": {"gossip": "key"}}))
            .await
            .unwrap();
        assert_eq!(resp["data"]["version"], 1);
    }

    #[tokio::test]
    async fn test_read_missing_path_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/consul/data/secret/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "root").unwrap();
        assert!(client.read("consul/data/secret/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enable_auth_tolerates_existing_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/auth/kubernetes-dc2"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"errors": ["path is already in use at kubernetes-dc2/"]}),
            ))
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "root").unwrap();
        client.enable_auth("kubernetes-dc2", "kubernetes").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_errors_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/policies/acl/consul-gossip"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})),
            )
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "bad").unwrap();
        let err = client.put_policy("consul-gossip", "path \"x\" {}").await.unwrap_err();
        assert!(matches!(err, VaultError::Api(ref m) if m == "permission denied"));
    }

    #[tokio::test]
    async fn test_empty_token_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .and(header("X-Vault-Token", ""))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sealed": true})))
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "").unwrap();
        let value = client.read("sys/seal-status").await.unwrap().unwrap();
        assert_eq!(value["sealed"], true);
    }

    #[tokio::test]
    async fn test_set_token_applies_to_later_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .and(header("X-Vault-Token", "s.root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "s.root"}})))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = VaultClient::new(&server.uri(), "").unwrap();
        client.set_token("s.root");
        let value = client.read("auth/token/lookup-self").await.unwrap().unwrap();
        assert_eq!(value["data"]["id"], "s.root");
    }
}
