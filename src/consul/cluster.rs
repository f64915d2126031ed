//! A Consul release installed with Helm into one Kubernetes context.

use tracing::info;

use crate::cleanup::CleanupStack;
use crate::config::TestConfig;
use crate::consul::ConsulClient;
use crate::helpers::HelmValues;
use crate::k8s::resources::{get_secret, secret_value, wait_for_pods_ready};
use crate::k8s::{helm_install, helm_uninstall, run_kubectl, KubeContext, PortForward};
use crate::Error;

const HTTP_PORT: u16 = 8500;
const HTTPS_PORT: u16 = 8501;

/// Chart values applied before the suite and caller overrides.
pub fn default_values() -> HelmValues {
    let mut values = HelmValues::new();
    values
        .insert("server.replicas", "1")
        .insert("server.bootstrapExpect", "1")
        .insert("connectInject.envoyExtraArgs", "--log-level debug")
        .insert("connectInject.logLevel", "debug")
        .insert("client.extraConfig", r#"{"log_level": "DEBUG"}"#)
        .insert("server.extraConfig", r#"{"log_level": "DEBUG"}"#);
    values
}

pub fn bootstrap_token_secret_name(release: &str) -> String {
    format!("{}-consul-bootstrap-acl-token", release)
}

pub struct ConsulHelmCluster {
    ctx: KubeContext,
    release_name: String,
    chart: String,
    values: HelmValues,
    /// Token used by [`ConsulHelmCluster::setup_consul_client`] instead of the
    /// bootstrap token (a secondary datacenter has none of its own).
    pub acl_token: Option<String>,
    port_forwards: Vec<PortForward>,
}

impl ConsulHelmCluster {
    /// Values are layered: chart defaults, then the suite configuration, then `values`.
    pub fn new(values: &HelmValues, ctx: &KubeContext, cfg: &TestConfig, release_name: &str) -> Self {
        let mut merged = default_values();
        merged.merge(&cfg.helm_values());
        merged.merge(values);
        Self {
            ctx: ctx.clone(),
            release_name: release_name.to_string(),
            chart: cfg.consul_helm_chart.clone(),
            values: merged,
            acl_token: None,
            port_forwards: Vec::new(),
        }
    }

    fn selector(&self) -> String {
        format!("release={}", self.release_name)
    }

    /// Installs the release and waits for all of its pods to be ready. The
    /// uninstall is registered before installing, so a failed install is
    /// removed as well.
    pub async fn create(&self, cleanup: &mut CleanupStack) -> Result<(), Error> {
        let ctx = self.ctx.clone();
        let release = self.release_name.clone();
        let selector = self.selector();
        cleanup.retain_on_failure(
            format!("{}: consul release {}", ctx.label, release),
            move |_| async move {
                helm_uninstall(&ctx.options, &release).await?;
                run_kubectl(&ctx.options, &["delete", "pvc", "-l", &selector]).await?;
                run_kubectl(&ctx.options, &["delete", "secret", "-l", &selector]).await?;
                Ok(())
            },
        );
        helm_install(&self.ctx.options, &self.release_name, &self.chart, &self.values).await?;

        wait_for_pods_ready(&self.ctx, &self.selector()).await?;
        info!(cluster = %self.ctx.label, release = %self.release_name, "consul ready");
        Ok(())
    }

    /// Client for the first server, reached through a port-forward that lives
    /// as long as this cluster handle.
    pub async fn setup_consul_client(&mut self, secure: bool) -> Result<ConsulClient, Error> {
        let (port, scheme) = if secure {
            (HTTPS_PORT, "https")
        } else {
            (HTTP_PORT, "http")
        };
        let forward = PortForward::start(
            &self.ctx.options,
            &format!("pod/{}-consul-server-0", self.release_name),
            port,
        )
        .await?;

        let token = match (&self.acl_token, secure) {
            (Some(token), _) => Some(token.clone()),
            (None, true) => {
                let secret = get_secret(&self.ctx, &bootstrap_token_secret_name(&self.release_name)).await?;
                secret_value(&secret, "token")
            }
            (None, false) => None,
        };

        let client = ConsulClient::new(&forward.url(scheme), token, secure)?;
        self.port_forwards.push(forward);
        Ok(client)
    }
}
