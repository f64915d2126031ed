//! Minimal Consul HTTP API client.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consul::health::HealthCheck;
use crate::consul::ConsulError;

/// `/v1/acl/replication` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclReplicationStatus {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub source_datacenter: String,
    #[serde(default)]
    pub replication_type: String,
    #[serde(default)]
    pub replicated_index: u64,
}

#[derive(Clone)]
pub struct ConsulClient {
    addr: String,
    token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for ConsulClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl ConsulClient {
    /// `insecure_tls` skips certificate verification, for HTTPS through a
    /// port-forward where the server certificate names do not match.
    pub fn new(addr: &str, token: Option<String>, insecure_tls: bool) -> Result<Self, ConsulError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.addr, path));
        if let Some(token) = &self.token {
            req = req.header("X-Consul-Token", token);
        }
        req
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, req: RequestBuilder) -> Result<T, ConsulError> {
        debug!(path = %path, "consul request");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ConsulError::HttpStatus {
                status: status.as_u16(),
                path: path.to_string(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Checks of `node`, as seen from datacenter `dc`.
    pub async fn health_node(&self, node: &str, dc: &str) -> Result<Vec<HealthCheck>, ConsulError> {
        let path = format!("/v1/health/node/{}", node);
        let req = self.request(Method::GET, &path).query(&[("dc", dc)]);
        self.send(&path, req).await
    }

    pub async fn acl_replication(&self) -> Result<AclReplicationStatus, ConsulError> {
        let path = "/v1/acl/replication";
        self.send(path, self.request(Method::GET, path)).await
    }

    /// Writes a config entry. Consul answers `true` when it was stored.
    pub async fn set_config_entry<E: Serialize>(&self, entry: &E) -> Result<(), ConsulError> {
        let path = "/v1/config";
        let body = serde_json::to_value(entry)?;
        let name = body
            .get("Name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        let stored: bool = self
            .send(path, self.request(Method::PUT, path).json(&body))
            .await?;
        if stored {
            Ok(())
        } else {
            Err(ConsulError::ConfigEntryRejected(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::config_entry::ServiceIntentions;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_health_node_queries_remote_dc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/node/rel-consul-server-0"))
            .and(query_param("dc", "dc2"))
            .and(header("X-Consul-Token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Node": "rel-consul-server-0", "CheckID": "serfHealth", "Status": "passing"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), Some("secret".to_string()), false).unwrap();
        let checks = client.health_node("rel-consul-server-0", "dc2").await.unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, "passing");
    }

    #[tokio::test]
    async fn test_set_config_entry() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/config"))
            .and(body_json(json!({
                "Kind": "service-intentions",
                "Name": "static-server",
                "Sources": [{"Name": "static-client", "Action": "allow"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None, false).unwrap();
        client
            .set_config_entry(&ServiceIntentions::allow("static-server", "static-client"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_config_entry_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(false)))
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None, false).unwrap();
        let err = client
            .set_config_entry(&ServiceIntentions::allow("static-server", "static-client"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsulError::ConfigEntryRejected(ref n) if n == "static-server"));
    }

    #[tokio::test]
    async fn test_http_errors_carry_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/acl/replication"))
            .respond_with(ResponseTemplate::new(403).set_body_string("ACL not found"))
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None, false).unwrap();
        match client.acl_replication().await.unwrap_err() {
            ConsulError::HttpStatus { status, path, body } => {
                assert_eq!(status, 403);
                assert_eq!(path, "/v1/acl/replication");
                assert_eq!(body, "ACL not found");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
