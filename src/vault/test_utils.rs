use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tracing::{debug, info};

/// Container-backed tests only run when this variable is set (they need Docker).
pub const DEV_VAULT_ENV: &str = "WANFED_RUN_VAULT_TESTS";

pub fn dev_vault_enabled() -> bool {
    std::env::var(DEV_VAULT_ENV).is_ok_and(|v| !v.is_empty() && v != "0")
}

/// Starts a dev-mode Vault with root token `root`.
pub async fn setup_vault_container() -> ContainerAsync<GenericImage> {
    info!("Setting up dev Vault container");

    let container = GenericImage::new("hashicorp/vault", "1.13.3")
        .with_exposed_port(8200.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Vault server started!"))
        .with_env_var("VAULT_DEV_ROOT_TOKEN_ID", "root")
        .with_env_var("VAULT_DEV_LISTEN_ADDRESS", "0.0.0.0:8200")
        .with_cmd(vec!["server", "-dev", "-dev-root-token-id=root"])
        .start()
        .await
        .expect("Failed to start container");
    info!("Vault container started");
    container
}

/// Wait for Vault to be ready
pub async fn wait_for_vault_ready(
    vault_addr: &str,
    max_retries: usize,
    retry_delay_ms: u64,
) -> Result<(), String> {
    let client = reqwest::Client::new();
    let health_url = format!("{}/v1/sys/health", vault_addr);

    info!("Waiting for Vault to be available at: {}", vault_addr);

    for attempt in 1..=max_retries {
        match client.get(&health_url).send().await {
            Ok(response) => match response.status().as_u16() {
                200 | 429 => {
                    info!("Vault ready after {} attempts", attempt);
                    return Ok(());
                }
                status => debug!("Vault not ready yet (status: {}), retrying...", status),
            },
            Err(e) => debug!("Connection to Vault failed (attempt {}): {}", attempt, e),
        }

        tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
    }

    Err(format!("Vault not ready after {} attempts", max_retries))
}
