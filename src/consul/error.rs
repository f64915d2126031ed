#[derive(Debug, thiserror::Error)]
pub enum ConsulError {
    #[error("HTTP status {status} from {path}: {body}")]
    HttpStatus {
        status: u16,
        path: String,
        body: String,
    },

    #[error("Consul rejected config entry {0}")]
    ConfigEntryRejected(String),

    /// The federation check did not converge.
    #[error("datacenters not federated: {0}")]
    NotFederated(String),

    #[error("Error from reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
