//! Common helper functions for Vault responses.

use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::vault::VaultError;

/// Checks the HTTP response from Vault. If successful, returns the JSON body;
/// otherwise, it extracts the first error message or returns the status code.
pub async fn check_response(resp: Response) -> Result<Value, VaultError> {
    let status = resp.status();
    if status.is_success() {
        if status == StatusCode::NO_CONTENT {
            return Ok(serde_json::json!({}));
        }
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        return serde_json::from_str(&body)
            .map_err(|e| VaultError::Parsing(format!("invalid response body: {}", e)));
    }

    let body = resp.text().await.unwrap_or_default();
    Err(error_from_body(status, body))
}

fn error_from_body(status: StatusCode, body: String) -> VaultError {
    if let Ok(val) = serde_json::from_str::<Value>(&body) {
        if let Some(errors) = val.get("errors").and_then(|v| v.as_array()) {
            let messages: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
            if !messages.is_empty() {
                return VaultError::Api(messages.join("; "));
            }
        }
    }
    VaultError::HttpStatus(status.as_u16(), body)
}

/// Pulls `data.<key>` out of a Vault response as a string.
pub fn data_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get("data").and_then(|d| d.get(key)).and_then(Value::as_str)
}
