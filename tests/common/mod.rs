//! Shared helpers for the integration tests: logging and a dev-mode Vault
//! container.

use std::time::Duration;

use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tracing::debug;

/// Container-backed tests only run when this variable is set (they need Docker).
pub const DEV_VAULT_ENV: &str = "WANFED_RUN_VAULT_TESTS";

/// Set up logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer() // This ensures output goes to both stdout and test output
        .try_init();
}

#[allow(dead_code)]
pub fn dev_vault_enabled() -> bool {
    std::env::var(DEV_VAULT_ENV).is_ok_and(|v| !v.is_empty() && v != "0")
}

/// Dev-mode Vault with root token `root`, listening on plain HTTP.
#[allow(dead_code)]
pub async fn setup_vault_container() -> ContainerAsync<GenericImage> {
    GenericImage::new("hashicorp/vault", "1.13.3")
        .with_exposed_port(8200.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Vault server started!"))
        .with_env_var("VAULT_DEV_ROOT_TOKEN_ID", "root")
        .with_env_var("VAULT_DEV_LISTEN_ADDRESS", "0.0.0.0:8200")
        .with_cmd(vec!["server", "-dev", "-dev-root-token-id=root"])
        .start()
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn vault_addr(container: &ContainerAsync<GenericImage>) -> String {
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(8200).await.unwrap();
    format!("http://{}:{}", host, port)
}

#[allow(dead_code)]
pub async fn wait_for_vault_ready(vault_addr: &str, max_retries: usize) -> Result<(), String> {
    let client = reqwest::Client::new();
    let health_url = format!("{}/v1/sys/health", vault_addr);
    for attempt in 1..=max_retries {
        match client.get(&health_url).send().await {
            Ok(response) if response.status().as_u16() == 200 => return Ok(()),
            Ok(response) => debug!("Vault not ready yet (status: {})", response.status()),
            Err(e) => debug!("Connection to Vault failed (attempt {}): {}", attempt, e),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err(format!("Vault not ready after {} attempts", max_retries))
}
