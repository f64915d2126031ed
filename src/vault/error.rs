#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Vault answered with an `{"errors": [...]}` body.
    #[error("API error: {0}")]
    Api(String),

    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}: {1}")]
    HttpStatus(u16, String),

    #[error("Vault is sealed: {0}")]
    Sealed(String),

    #[error("Vault server is not enabled in release {0}")]
    ServerDisabled(String),

    #[error("Error from reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// True when Vault rejected a mount or auth enable because the path exists.
    pub fn is_path_in_use(&self) -> bool {
        match self {
            VaultError::Api(msg) | VaultError::HttpStatus(_, msg) => {
                msg.contains("path is already in use")
            }
            _ => false,
        }
    }
}
