//! WAN federation of two Consul datacenters through mesh gateways, with a
//! single Vault server in the primary cluster as the secrets backend.
//!
//! The primary cluster runs the Vault server, exposed so that the secondary
//! can reach it; the secondary only runs the Vault agent injector and logs
//! in through its own kubernetes auth method (`kubernetes-dc2`) backed by a
//! service account of the secondary cluster.

pub mod addresses;
pub mod secrets;
pub mod values;

use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::cleanup::{CleanupReport, CleanupStack};
use crate::config::TestConfig;
use crate::consul::federation::verify_federation;
use crate::consul::{ConsulHelmCluster, ServiceIntentions};
use crate::helpers::random_name;
use crate::k8s::kustomize::{
    check_static_server_connection, deploy_kustomize, kubectl_apply_k, kubectl_delete_k,
};
use crate::k8s::resources::{
    api_server_host, copy_secret, create_auth_delegator_binding, create_service_account,
    delete_cluster_role_binding, delete_secret, delete_service_account,
};
use crate::k8s::Environment;
use crate::vault::cluster::DEFAULT_AUTH_PATH;
use crate::vault::{ca_secret_name, VaultCluster};
use crate::Error;

use addresses::{external_vault_address, primary_mesh_gateway_address};
use values::{ValueFlags, SECONDARY_AUTH_PATH};

pub const STATIC_CLIENT_NAME: &str = "static-client";
pub const STATIC_SERVER_NAME: &str = "static-server";
/// Upstream of the static client, bound to the static server in dc2.
pub const STATIC_SERVER_UPSTREAM_URL: &str = "http://localhost:1234";

pub const MESH_GATEWAY_FIXTURE: &str = "bases/mesh-gateway";
pub const STATIC_SERVER_FIXTURE: &str = "cases/static-server-inject";
pub const STATIC_CLIENT_FIXTURE: &str = "cases/static-client-multi-dc";

/// Fails early when a kustomize directory the run applies is missing.
pub fn check_fixtures(fixtures_dir: &Path) -> Result<(), Error> {
    for fixture in [MESH_GATEWAY_FIXTURE, STATIC_SERVER_FIXTURE, STATIC_CLIENT_FIXTURE] {
        let kustomization = fixtures_dir.join(fixture).join("kustomization.yaml");
        if !kustomization.is_file() {
            return Err(Error::Config(format!(
                "missing fixture {}",
                kustomization.display()
            )));
        }
    }
    Ok(())
}

#[derive(Debug)]
pub enum Outcome {
    /// Multi-cluster support is off; nothing was touched.
    Skipped(String),
    Federated(FederationReport),
}

/// What a successful run created and observed.
#[derive(Debug, Clone, Default)]
pub struct FederationReport {
    pub vault_release: String,
    pub consul_release: String,
    pub external_vault_address: String,
    pub primary_gateway: String,
    pub primary_cert_path: String,
    pub secondary_cert_path: String,
    pub elapsed_secs: u64,
    pub cleanup: CleanupReport,
}

/// Runs the whole bootstrap and the end-to-end checks, then tears down
/// everything it created.
pub async fn run(cfg: &TestConfig) -> Result<Outcome, Error> {
    if !cfg.enable_multi_cluster {
        let reason = "multi-cluster support is not enabled".to_string();
        info!(%reason, "skipping WAN federation run");
        return Ok(Outcome::Skipped(reason));
    }
    cfg.validate()?;
    check_fixtures(&cfg.fixtures_dir)?;

    let env = Environment::from_config(cfg).await?;
    let mut cleanup = CleanupStack::new(cfg.no_cleanup_on_failure);
    let started = Instant::now();

    let result = federate(cfg, &env, &mut cleanup).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "WAN federation run failed");
    }
    let cleanup_report = cleanup.run(result.is_err()).await;

    let mut report = result?;
    report.elapsed_secs = started.elapsed().as_secs();
    report.cleanup = cleanup_report;
    Ok(Outcome::Federated(report))
}

async fn federate(
    cfg: &TestConfig,
    env: &Environment,
    cleanup: &mut CleanupStack,
) -> Result<FederationReport, Error> {
    let primary = &env.primary;
    let secondary = &env.secondary;
    let flags = ValueFlags::from(cfg);
    let primary_ns = primary.namespace().to_string();
    let secondary_ns = secondary.namespace().to_string();

    let vault_release = random_name();
    let consul_release = random_name();
    info!(vault_release = %vault_release, consul_release = %consul_release, "starting WAN federation run");

    // Vault: server in the primary, injector only in the secondary.
    let mut primary_vault = VaultCluster::new(
        primary,
        cfg,
        &vault_release,
        &values::primary_vault_values(cfg.use_kind),
    );
    primary_vault.create(cleanup).await?;

    let external_vault_addr = external_vault_address(primary, &vault_release, cfg.use_kind).await?;
    info!(address = %external_vault_addr, "vault reachable from the secondary");

    let mut secondary_vault = VaultCluster::new(
        secondary,
        cfg,
        &vault_release,
        &values::secondary_vault_values(&external_vault_addr),
    );
    secondary_vault.create(cleanup).await?;

    let vault = primary_vault.vault_client()?;

    secrets::configure_gossip_secret(vault).await?;
    if cfg.enable_enterprise {
        let license = cfg.enterprise_license.as_deref().unwrap_or_default();
        secrets::configure_enterprise_license(vault, license).await?;
    }
    secrets::configure_kubernetes_auth_roles(
        vault,
        &consul_release,
        &primary_ns,
        DEFAULT_AUTH_PATH,
        "dc1",
        cfg.enable_enterprise,
    )
    .await?;

    // Identity in the secondary that Vault uses to review its tokens.
    let auth_method_name = format!("{}-vault-auth-method", vault_release);
    create_auth_delegator_binding(secondary, &auth_method_name, &auth_method_name).await?;
    {
        let ctx = secondary.clone();
        let name = auth_method_name.clone();
        cleanup.always(format!("secondary: clusterrolebinding {}", name), move |_| async move {
            delete_cluster_role_binding(&ctx, &name).await
        });
    }
    create_service_account(secondary, &auth_method_name).await?;
    {
        let ctx = secondary.clone();
        let name = auth_method_name.clone();
        cleanup.always(format!("secondary: serviceaccount {}", name), move |_| async move {
            delete_service_account(&ctx, &name).await
        });
    }

    let k8s_host = api_server_host(secondary, cfg.use_kind).await?;
    secondary_vault
        .configure_auth_method(vault, SECONDARY_AUTH_PATH, &k8s_host, &auth_method_name, cleanup)
        .await?;
    secrets::configure_kubernetes_auth_roles(
        vault,
        &consul_release,
        &secondary_ns,
        SECONDARY_AUTH_PATH,
        "dc2",
        cfg.enable_enterprise,
    )
    .await?;

    // Certificates, replication token and Connect CA access.
    secrets::configure_pki_ca(vault).await?;
    let primary_cert_path =
        secrets::configure_pki_certificates(vault, &consul_release, &primary_ns, "dc1").await?;
    let secondary_cert_path =
        secrets::configure_pki_certificates(vault, &consul_release, &secondary_ns, "dc2").await?;
    let replication_token = secrets::configure_replication_token(
        vault,
        &consul_release,
        &[
            (DEFAULT_AUTH_PATH, primary_ns.as_str()),
            (SECONDARY_AUTH_PATH, secondary_ns.as_str()),
        ],
    )
    .await?;
    secrets::create_connect_ca_policy(vault, "dc1").await?;
    secrets::create_connect_ca_policy(vault, "dc2").await?;

    // The secondary's pods mount the Vault CA too.
    let vault_ca_secret = ca_secret_name(&vault_release);
    copy_secret(primary, secondary, &vault_ca_secret).await?;
    {
        let ctx = secondary.clone();
        let name = vault_ca_secret.clone();
        cleanup.always(format!("secondary: secret {}", name), move |_| async move {
            delete_secret(&ctx, &name).await
        });
    }

    // Consul.
    let primary_consul_values =
        values::primary_consul_values(&vault_release, &primary_cert_path, &primary_vault.address(), flags);
    let mut primary_consul = ConsulHelmCluster::new(&primary_consul_values, primary, cfg, &consul_release);
    primary_consul.create(cleanup).await?;

    let primary_gateway = primary_mesh_gateway_address(primary, &consul_release, cfg.use_kind).await?;
    let secondary_consul_values = values::secondary_consul_values(
        &vault_release,
        &secondary_cert_path,
        &external_vault_addr,
        &primary_gateway,
        flags,
    );
    let mut secondary_consul =
        ConsulHelmCluster::new(&secondary_consul_values, secondary, cfg, &consul_release);
    secondary_consul.create(cleanup).await?;

    info!("verifying federation");
    let primary_client = primary_consul.setup_consul_client(true).await?;
    secondary_consul.acl_token = Some(replication_token);
    let secondary_client = secondary_consul.setup_consul_client(true).await?;
    verify_federation(&primary_client, &secondary_client, &consul_release, true).await?;

    // Route service traffic through the mesh gateways.
    let mesh_gateway_dir = cfg.fixtures_dir.join(MESH_GATEWAY_FIXTURE);
    kubectl_apply_k(primary, &mesh_gateway_dir).await?;
    {
        let ctx = primary.clone();
        let dir = mesh_gateway_dir.clone();
        cleanup.retain_on_failure(format!("primary: kustomize {}", dir.display()), move |_| async move {
            kubectl_delete_k(&ctx, &dir).await
        });
    }

    info!("deploying {} in dc2 and {} in dc1", STATIC_SERVER_NAME, STATIC_CLIENT_NAME);
    deploy_kustomize(
        secondary,
        cleanup,
        cfg.debug_directory.clone(),
        &cfg.fixtures_dir.join(STATIC_SERVER_FIXTURE),
    )
    .await?;
    deploy_kustomize(
        primary,
        cleanup,
        cfg.debug_directory.clone(),
        &cfg.fixtures_dir.join(STATIC_CLIENT_FIXTURE),
    )
    .await?;

    primary_client
        .set_config_entry(&ServiceIntentions::allow(STATIC_SERVER_NAME, STATIC_CLIENT_NAME))
        .await?;
    info!("intention created, checking cross-datacenter connection");
    check_static_server_connection(primary, STATIC_CLIENT_NAME, STATIC_SERVER_UPSTREAM_URL).await?;

    Ok(FederationReport {
        vault_release,
        consul_release,
        external_vault_address: external_vault_addr,
        primary_gateway,
        primary_cert_path,
        secondary_cert_path,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_skipped_without_multi_cluster() {
        // Contexts that do not exist: a skipped run must not try to reach them.
        let cfg = TestConfig {
            kube_context: Some("does-not-exist".to_string()),
            secondary_kube_context: Some("does-not-exist-either".to_string()),
            ..TestConfig::default()
        };
        match run(&cfg).await.unwrap() {
            Outcome::Skipped(reason) => assert!(reason.contains("multi-cluster")),
            other => panic!("expected a skipped run, got {:?}", other),
        }
    }

    #[test]
    fn test_check_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(check_fixtures(dir.path()), Err(Error::Config(_))));

        for fixture in [MESH_GATEWAY_FIXTURE, STATIC_SERVER_FIXTURE, STATIC_CLIENT_FIXTURE] {
            let path = dir.path().join(fixture);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("kustomization.yaml"), "resources: []\n").unwrap();
        }
        assert!(check_fixtures(dir.path()).is_ok());
    }

    #[test]
    fn test_bundled_fixtures_present() {
        check_fixtures(&Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures")).unwrap();
    }
}
