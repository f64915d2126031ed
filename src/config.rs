//! Suite configuration.
//!
//! Every flag can also be supplied through the environment, which is how the
//! acceptance tests in `tests/` pick it up (`TestConfig::from_env`).

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::helpers::HelmValues;
use crate::Error;

/// Default Consul image used to derive the enterprise image when none is set.
pub const DEFAULT_CONSUL_IMAGE: &str = "hashicorp/consul:1.11.4";

#[derive(Debug, Clone, Args)]
pub struct TestConfig {
    /// Run tests that need two Kubernetes contexts.
    #[arg(long, env = "WANFED_ENABLE_MULTI_CLUSTER")]
    pub enable_multi_cluster: bool,

    /// Deploy Consul Enterprise (requires a license).
    #[arg(long, env = "WANFED_ENABLE_ENTERPRISE")]
    pub enable_enterprise: bool,

    /// Consul Enterprise license stored in Vault.
    #[arg(long, env = "CONSUL_ENT_LICENSE", hide_env_values = true)]
    pub enterprise_license: Option<String>,

    /// Clusters are kind clusters; expose services through NodePorts.
    #[arg(long, env = "WANFED_USE_KIND")]
    pub use_kind: bool,

    /// Kube context of the primary cluster (current context when unset).
    #[arg(long, env = "WANFED_KUBECONTEXT")]
    pub kube_context: Option<String>,

    #[arg(long, env = "WANFED_KUBE_NAMESPACE", default_value = "default")]
    pub kube_namespace: String,

    /// Kube context of the secondary cluster.
    #[arg(long, env = "WANFED_SECONDARY_KUBECONTEXT")]
    pub secondary_kube_context: Option<String>,

    #[arg(long, env = "WANFED_SECONDARY_KUBE_NAMESPACE", default_value = "default")]
    pub secondary_kube_namespace: String,

    #[arg(long, env = "WANFED_CONSUL_HELM_CHART", default_value = "hashicorp/consul")]
    pub consul_helm_chart: String,

    #[arg(long, env = "WANFED_VAULT_HELM_CHART", default_value = "hashicorp/vault")]
    pub vault_helm_chart: String,

    #[arg(long, env = "WANFED_CONSUL_IMAGE")]
    pub consul_image: Option<String>,

    #[arg(long, env = "WANFED_CONSUL_K8S_IMAGE")]
    pub consul_k8s_image: Option<String>,

    #[arg(long, env = "WANFED_ENVOY_IMAGE")]
    pub envoy_image: Option<String>,

    /// Vault server image tag.
    #[arg(long, env = "WANFED_VAULT_SERVER_VERSION")]
    pub vault_server_version: Option<String>,

    #[arg(long, env = "WANFED_ENABLE_TRANSPARENT_PROXY")]
    pub enable_transparent_proxy: bool,

    /// Keep resources around when the run fails, for debugging.
    #[arg(long, env = "WANFED_NO_CLEANUP_ON_FAILURE")]
    pub no_cleanup_on_failure: bool,

    /// Where pod descriptions and logs are written when the run fails.
    #[arg(long, env = "WANFED_DEBUG_DIRECTORY")]
    pub debug_directory: Option<PathBuf>,

    /// Directory holding the kustomize fixtures.
    #[arg(long, env = "WANFED_FIXTURES_DIR", default_value = "fixtures")]
    pub fixtures_dir: PathBuf,
}

#[derive(Parser)]
#[command(name = "wanfed-vault")]
struct EnvOnly {
    #[command(flatten)]
    config: TestConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            enable_multi_cluster: false,
            enable_enterprise: false,
            enterprise_license: None,
            use_kind: false,
            kube_context: None,
            kube_namespace: "default".to_string(),
            secondary_kube_context: None,
            secondary_kube_namespace: "default".to_string(),
            consul_helm_chart: "hashicorp/consul".to_string(),
            vault_helm_chart: "hashicorp/vault".to_string(),
            consul_image: None,
            consul_k8s_image: None,
            envoy_image: None,
            vault_server_version: None,
            enable_transparent_proxy: false,
            no_cleanup_on_failure: false,
            debug_directory: None,
            fixtures_dir: PathBuf::from("fixtures"),
        }
    }
}

impl TestConfig {
    /// Builds the configuration from environment variables alone.
    pub fn from_env() -> Result<Self, Error> {
        EnvOnly::try_parse_from(["wanfed-vault"])
            .map(|parsed| parsed.config)
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.enable_enterprise
            && self
                .enterprise_license
                .as_deref()
                .map_or(true, |l| l.trim().is_empty())
        {
            return Err(Error::Config(
                "enterprise mode requires CONSUL_ENT_LICENSE to be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Consul chart overrides that every cluster in the suite gets.
    pub fn helm_values(&self) -> HelmValues {
        let mut values = HelmValues::new();

        if self.enable_enterprise {
            let base = self.consul_image.as_deref().unwrap_or(DEFAULT_CONSUL_IMAGE);
            values.insert("global.image", enterprise_image(base));
        } else if let Some(image) = &self.consul_image {
            values.insert("global.image", image);
        }

        values.insert(
            "connectInject.transparentProxy.defaultEnabled",
            self.enable_transparent_proxy.to_string(),
        );

        if let Some(image) = &self.consul_k8s_image {
            values.insert("global.imageK8S", image);
        }
        if let Some(image) = &self.envoy_image {
            values.insert("global.imageEnvoy", image);
        }
        values
    }
}

/// Maps an OSS Consul image to its enterprise counterpart.
///
/// Images that already point at the enterprise repository are returned as is.
pub fn enterprise_image(image: &str) -> String {
    if image.contains("consul-enterprise") {
        return image.to_string();
    }
    let (repo, tag) = match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
        _ => (image, None),
    };
    let repo = match repo.strip_suffix("/consul") {
        Some(prefix) => format!("{}/consul-enterprise", prefix),
        None if repo == "consul" => "consul-enterprise".to_string(),
        None => repo.to_string(),
    };
    match tag {
        Some(tag) if tag.ends_with("-ent") => format!("{}:{}", repo, tag),
        Some(tag) => format!("{}:{}-ent", repo, tag),
        None => repo,
    }
}
