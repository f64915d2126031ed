//! A Helm-installed Vault in one Kubernetes context.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tracing::info;

use crate::cleanup::CleanupStack;
use crate::config::TestConfig;
use crate::helpers::HelmValues;
use crate::k8s::resources::{
    create_secret, create_service_account_token, delete_secret, string_secret,
    wait_for_pods_ready, wait_for_pods_running,
};
use crate::k8s::{helm_install, helm_uninstall, run_kubectl, KubeContext, PortForward};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::vault::auth::configure_kubernetes_auth;
use crate::vault::tls::{vault_server_dns_names, CertificateAuthority};
use crate::vault::{VaultClient, VaultError};
use crate::Error;

pub const VAULT_PORT: u16 = 8200;
/// Vault's own auth method, configured during bootstrap.
pub const DEFAULT_AUTH_PATH: &str = "kubernetes";
/// kv-v2 mount holding the Consul secrets.
pub const CONSUL_KV_MOUNT: &str = "consul";
const IN_CLUSTER_KUBERNETES_HOST: &str = "https://kubernetes.default.svc";

/// Secret holding the CA that signed the Vault server certificate (`tls.crt`).
pub fn ca_secret_name(release: &str) -> String {
    format!("{}-vault-ca", release)
}

pub fn server_tls_secret_name(release: &str) -> String {
    format!("{}-vault-server-tls", release)
}

pub fn root_token_secret_name(release: &str) -> String {
    format!("{}-vault-root-token", release)
}

/// In-cluster address of the Vault server of `release`.
pub fn service_address(release: &str) -> String {
    format!("https://{}-vault:{}", release, VAULT_PORT)
}

fn userconfig_path(secret: &str, file: &str) -> String {
    format!("/vault/userconfig/{}/{}", secret, file)
}

fn server_config(release: &str) -> String {
    let cert_secret = server_tls_secret_name(release);
    format!(
        r#"listener "tcp" {{
  address = "[::]:8200"
  cluster_address = "[::]:8201"
  tls_cert_file = "{}"
  tls_key_file = "{}"
}}

storage "file" {{
  path = "/vault/data"
}}
"#,
        userconfig_path(&cert_secret, "tls.crt"),
        userconfig_path(&cert_secret, "tls.key"),
    )
}

/// Chart values every Vault release in the suite starts from.
pub fn default_values(release: &str, cfg: &TestConfig) -> HelmValues {
    let cert_secret = server_tls_secret_name(release);
    let ca_secret = ca_secret_name(release);

    let mut values = HelmValues::new();
    values
        .insert("injector.enabled", "true")
        .insert("global.tlsDisable", "false")
        .insert("server.standalone.enabled", "true")
        .insert("server.standalone.config", server_config(release))
        .insert(
            "server.extraEnvironmentVars.VAULT_CACERT",
            userconfig_path(&ca_secret, "tls.crt"),
        )
        .insert("server.extraVolumes[0].type", "secret")
        .insert("server.extraVolumes[0].name", cert_secret)
        .insert("server.extraVolumes[1].type", "secret")
        .insert("server.extraVolumes[1].name", ca_secret);

    if let Some(version) = &cfg.vault_server_version {
        values.insert("server.image.tag", version);
    }
    values
}

pub struct VaultCluster {
    ctx: KubeContext,
    release_name: String,
    chart: String,
    values: HelmValues,
    client: Option<VaultClient>,
    port_forward: Option<PortForward>,
}

impl VaultCluster {
    /// `overrides` are layered on top of [`default_values`].
    pub fn new(ctx: &KubeContext, cfg: &TestConfig, release_name: &str, overrides: &HelmValues) -> Self {
        let mut values = default_values(release_name, cfg);
        values.merge(overrides);
        Self {
            ctx: ctx.clone(),
            release_name: release_name.to_string(),
            chart: cfg.vault_helm_chart.clone(),
            values,
            client: None,
            port_forward: None,
        }
    }

    pub fn server_enabled(&self) -> bool {
        self.values.get("server.enabled") != Some("false")
    }

    /// In-cluster address of the Vault server.
    pub fn address(&self) -> String {
        service_address(&self.release_name)
    }

    /// Root-token client, available once [`VaultCluster::create`] has run on a
    /// release with the server enabled.
    pub fn vault_client(&self) -> Result<&VaultClient, VaultError> {
        self.client
            .as_ref()
            .ok_or_else(|| VaultError::ServerDisabled(self.release_name.clone()))
    }

    fn release_selector(&self) -> String {
        format!("app.kubernetes.io/instance={}", self.release_name)
    }

    pub async fn create(&mut self, cleanup: &mut CleanupStack) -> Result<(), Error> {
        info!(
            cluster = %self.ctx.label,
            release = %self.release_name,
            server = self.server_enabled(),
            "creating vault cluster"
        );

        let ca_pem = if self.server_enabled() {
            Some(self.create_tls_secrets(cleanup).await?)
        } else {
            None
        };

        // A failed install can still leave a release behind.
        let ctx = self.ctx.clone();
        let release = self.release_name.clone();
        let selector = self.release_selector();
        cleanup.retain_on_failure(format!("{}: vault release {}", ctx.label, release), move |_| async move {
            helm_uninstall(&ctx.options, &release).await?;
            run_kubectl(&ctx.options, &["delete", "pvc", "-l", &selector]).await?;
            Ok(())
        });
        helm_install(&self.ctx.options, &self.release_name, &self.chart, &self.values).await?;

        if let Some(ca_pem) = ca_pem {
            self.initialize(&ca_pem, cleanup).await?;
        }

        wait_for_pods_ready(&self.ctx, &self.release_selector()).await?;

        if self.client.is_some() {
            self.bootstrap(cleanup).await?;
        }
        Ok(())
    }

    /// Creates the CA and server certificate secrets and returns the CA PEM.
    async fn create_tls_secrets(&self, cleanup: &mut CleanupStack) -> Result<String, Error> {
        let ca = CertificateAuthority::new("Vault CA")?;
        let ca_pem = ca.cert_pem()?;
        let server = ca.issue_server_cert(
            &format!("{}-vault", self.release_name),
            &vault_server_dns_names(&self.release_name, self.ctx.namespace()),
            &[IpAddr::V4(Ipv4Addr::LOCALHOST)],
        )?;

        let ca_secret = ca_secret_name(&self.release_name);
        create_secret(
            &self.ctx,
            &string_secret(
                &ca_secret,
                Some("Opaque"),
                BTreeMap::from([("tls.crt".to_string(), ca_pem.clone())]),
            ),
        )
        .await?;
        self.register_secret_cleanup(cleanup, ca_secret);

        let tls_secret = server_tls_secret_name(&self.release_name);
        create_secret(
            &self.ctx,
            &string_secret(
                &tls_secret,
                Some("kubernetes.io/tls"),
                BTreeMap::from([
                    ("tls.crt".to_string(), server.cert_pem),
                    ("tls.key".to_string(), server.key_pem),
                ]),
            ),
        )
        .await?;
        self.register_secret_cleanup(cleanup, tls_secret);

        Ok(ca_pem)
    }

    fn register_secret_cleanup(&self, cleanup: &mut CleanupStack, name: String) {
        let ctx = self.ctx.clone();
        cleanup.always(format!("{}: secret {}", ctx.label, name), move |_| async move {
            delete_secret(&ctx, &name).await
        });
    }

    /// Initializes (one key share) and unseals the server through a port-forward,
    /// then keeps the root token in a secret.
    async fn initialize(&mut self, ca_pem: &str, cleanup: &mut CleanupStack) -> Result<(), Error> {
        let server_selector = format!("{},component=server", self.release_selector());
        wait_for_pods_running(&self.ctx, &server_selector).await?;

        let forward = PortForward::start(
            &self.ctx.options,
            &format!("pod/{}-vault-0", self.release_name),
            VAULT_PORT,
        )
        .await?;
        let mut client = VaultClient::with_ca_pem(&forward.url("https"), "", ca_pem)?;

        let retry = RetryConfig::fixed(30, Duration::from_secs(2));
        retry_with_backoff(&retry, "vault listener", || client.seal_status()).await?;

        let init = client.init(1, 1).await?;
        client.unseal(&init.keys).await?;
        client.set_token(&init.root_token);

        let token_secret = root_token_secret_name(&self.release_name);
        create_secret(
            &self.ctx,
            &string_secret(
                &token_secret,
                None,
                BTreeMap::from([("token".to_string(), init.root_token.clone())]),
            ),
        )
        .await?;
        self.register_secret_cleanup(cleanup, token_secret);

        self.client = Some(client);
        self.port_forward = Some(forward);
        Ok(())
    }

    /// kv-v2 at `consul` and Vault's own kubernetes auth method.
    async fn bootstrap(&self, cleanup: &mut CleanupStack) -> Result<(), Error> {
        let client = self.vault_client()?;
        client.mount(CONSUL_KV_MOUNT, "kv-v2", None).await?;

        client.enable_auth(DEFAULT_AUTH_PATH, "kubernetes").await?;
        let service_account = format!("{}-vault", self.release_name);
        let token = create_service_account_token(&self.ctx, &service_account).await?;
        self.register_secret_cleanup(cleanup, token.secret_name.clone());

        configure_kubernetes_auth(
            client,
            DEFAULT_AUTH_PATH,
            IN_CLUSTER_KUBERNETES_HOST,
            Some(&token.token),
            Some(&token.ca_cert),
        )
        .await?;
        info!(release = %self.release_name, "vault bootstrapped");
        Ok(())
    }

    /// Lets `vault` authenticate workloads of THIS cluster: enables a
    /// kubernetes auth method at `auth_path` and configures it with a token of
    /// `service_account`, which must be bound to `system:auth-delegator`.
    pub async fn configure_auth_method(
        &self,
        vault: &VaultClient,
        auth_path: &str,
        kubernetes_host: &str,
        service_account: &str,
        cleanup: &mut CleanupStack,
    ) -> Result<(), Error> {
        vault.enable_auth(auth_path, "kubernetes").await?;

        let token = create_service_account_token(&self.ctx, service_account).await?;
        self.register_secret_cleanup(cleanup, token.secret_name.clone());

        configure_kubernetes_auth(
            vault,
            auth_path,
            kubernetes_host,
            Some(&token.token),
            Some(&token.ca_cert),
        )
        .await?;
        Ok(())
    }
}
