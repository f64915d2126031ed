//! Vault initialization and unsealing operations.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::vault::{VaultClient, VaultError};

/// Request body of `sys/init`.
#[derive(Debug, Serialize)]
struct InitRequest {
    secret_shares: u8,
    secret_threshold: u8,
}

/// Response returned from Vault initialization.
#[derive(Clone, Serialize, Deserialize)]
pub struct InitResult {
    /// Unseal keys generated during initialization.
    #[serde(default)]
    pub keys: Vec<String>,

    #[serde(default)]
    pub keys_base64: Vec<String>,

    /// Root token for the initialized Vault.
    pub root_token: String,
}

impl std::fmt::Debug for InitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitResult")
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

/// Body of `sys/seal-status` and of each `sys/unseal` answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealStatus {
    #[serde(default)]
    pub initialized: bool,
    pub sealed: bool,
    #[serde(default, rename = "t")]
    pub threshold: u8,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub version: String,
}

impl VaultClient {
    /// Initializes Vault with `shares` unseal keys, `threshold` of which unseal it.
    pub async fn init(&self, shares: u8, threshold: u8) -> Result<InitResult, VaultError> {
        let req = InitRequest {
            secret_shares: shares,
            secret_threshold: threshold,
        };
        let resp = self.write("sys/init", serde_json::to_value(&req)?).await?;
        let result: InitResult = serde_json::from_value(resp)?;
        info!(addr = %self.addr, shares, "vault initialized");
        Ok(result)
    }

    /// Submits unseal keys until Vault reports itself unsealed.
    pub async fn unseal(&self, keys: &[String]) -> Result<SealStatus, VaultError> {
        let mut status = self.seal_status().await?;
        for key in keys {
            if !status.sealed {
                break;
            }
            let resp = self.write("sys/unseal", json!({ "key": key })).await?;
            status = serde_json::from_value(resp)?;
        }
        if status.sealed {
            return Err(VaultError::Sealed(format!(
                "unseal progress {}/{}",
                status.progress, status.threshold
            )));
        }
        info!(addr = %self.addr, "vault unsealed");
        Ok(status)
    }

    pub async fn seal_status(&self) -> Result<SealStatus, VaultError> {
        let resp = self
            .request(reqwest::Method::GET, "sys/seal-status", None)
            .await?;
        Ok(serde_json::from_value(resp)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_init_and_unseal_single_share() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/init"))
            .and(body_json(json!({"secret_shares": 1, "secret_threshold": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": ["abcd"],
                "keys_base64": ["q80="],
                "root_token": "hvs.root"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "initialized": true, "sealed": true, "t": 1, "progress": 0
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/unseal"))
            .and(body_json(json!({"key": "abcd"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "initialized": true, "sealed": false, "t": 1, "progress": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "").unwrap();
        let init = client.init(1, 1).await.unwrap();
        assert_eq!(init.root_token, "hvs.root");
        assert_eq!(init.keys, vec!["abcd"]);

        let status = client.unseal(&init.keys).await.unwrap();
        assert!(!status.sealed);
    }

    #[tokio::test]
    async fn test_unseal_reports_still_sealed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "initialized": true, "sealed": true, "t": 2, "progress": 0
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/unseal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "initialized": true, "sealed": true, "t": 2, "progress": 1
            })))
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "").unwrap();
        let err = client.unseal(&["one".to_string()]).await.unwrap_err();
        assert!(matches!(err, VaultError::Sealed(ref m) if m == "unseal progress 1/2"));
    }
}
