//! Bootstraps the secrets backend of a federated run against a dev-mode Vault.
//!
//! Needs Docker; set `WANFED_RUN_VAULT_TESTS=1` to run.

mod common;

use serde_json::json;
use serial_test::serial;
use tracing::info;
use wanfed_vault::federation::secrets;
use wanfed_vault::federation::values::{GOSSIP_SECRET_PATH, REPLICATION_SECRET_PATH, SECONDARY_AUTH_PATH};
use wanfed_vault::vault::cluster::{CONSUL_KV_MOUNT, DEFAULT_AUTH_PATH};
use wanfed_vault::vault::VaultClient;

use common::{dev_vault_enabled, init_logging, setup_vault_container, vault_addr, wait_for_vault_ready};

#[tokio::test]
#[serial]
async fn test_secrets_backend_bootstrap() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    if !dev_vault_enabled() {
        info!("dev Vault tests disabled, skipping");
        return Ok(());
    }

    let container = setup_vault_container().await;
    let addr = vault_addr(&container).await;
    wait_for_vault_ready(&addr, 30).await?;
    let vault = VaultClient::new(&addr, "root")?;

    vault.mount(CONSUL_KV_MOUNT, "kv-v2", None).await?;
    vault.enable_auth(DEFAULT_AUTH_PATH, "kubernetes").await?;
    vault.enable_auth(SECONDARY_AUTH_PATH, "kubernetes").await?;

    // Gossip key is readable back from the kv-v2 path the chart is given.
    let gossip = secrets::configure_gossip_secret(&vault).await?;
    let stored = vault.read(GOSSIP_SECRET_PATH).await?.expect("gossip secret");
    assert_eq!(stored["data"]["data"]["gossip"], json!(gossip));

    for (auth_path, dc) in [(DEFAULT_AUTH_PATH, "dc1"), (SECONDARY_AUTH_PATH, "dc2")] {
        secrets::configure_kubernetes_auth_roles(&vault, "consul", "default", auth_path, dc, false).await?;
        let role = vault
            .read(&format!("auth/{}/role/consul-server", auth_path))
            .await?
            .expect("consul-server role");
        let policies = role["data"]["token_policies"].as_array().cloned().unwrap_or_default();
        assert!(policies.contains(&json!(format!("consul-server-{}", dc))));
    }

    // Server certificates are issued for the datacenter's domain.
    secrets::configure_pki_ca(&vault).await?;
    let issue_path = secrets::configure_pki_certificates(&vault, "consul", "default", "dc1").await?;
    assert_eq!(issue_path, "pki/issue/consul-server-dc1");
    let issued = vault
        .write(&issue_path, json!({ "common_name": "server.dc1.consul", "ttl": "1h" }))
        .await?;
    assert!(issued["data"]["certificate"]
        .as_str()
        .unwrap_or_default()
        .starts_with("-----BEGIN CERTIFICATE-----"));

    let token = secrets::configure_replication_token(
        &vault,
        "consul",
        &[(DEFAULT_AUTH_PATH, "default"), (SECONDARY_AUTH_PATH, "default")],
    )
    .await?;
    let stored = vault.read(REPLICATION_SECRET_PATH).await?.expect("replication secret");
    assert_eq!(stored["data"]["data"]["replication"], json!(token));
    assert!(vault
        .read(&format!("auth/{}/role/server-acl-init", SECONDARY_AUTH_PATH))
        .await?
        .is_some());

    secrets::create_connect_ca_policy(&vault, "dc2").await?;
    let policy = vault
        .read("sys/policies/acl/connect-ca-dc2")
        .await?
        .expect("connect-ca policy");
    assert!(policy["data"]["policy"]
        .as_str()
        .unwrap_or_default()
        .contains("/dc2/connect_inter/*"));

    Ok(())
}
