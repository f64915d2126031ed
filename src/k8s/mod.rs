//! Kubernetes plumbing: the two test contexts and the operations the
//! federation procedure performs against them.

pub mod command;
pub mod kustomize;
pub mod port_forward;
pub mod resources;

pub use command::{helm_install, helm_uninstall, run_helm, run_kubectl, KubectlOptions};
pub use port_forward::PortForward;

use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::info;

use crate::config::TestConfig;
use crate::Error;

/// One Kubernetes cluster as seen by the suite.
#[derive(Clone)]
pub struct KubeContext {
    /// Human readable role of the cluster ("primary", "secondary").
    pub label: String,
    pub options: KubectlOptions,
    pub client: Client,
    /// API server URL from the kubeconfig.
    pub api_server_url: String,
}

impl KubeContext {
    pub async fn connect(
        label: impl Into<String>,
        context: Option<String>,
        namespace: impl Into<String>,
    ) -> Result<Self, Error> {
        let label = label.into();
        let config = Config::from_kubeconfig(&KubeConfigOptions {
            context: context.clone(),
            ..Default::default()
        })
        .await?;
        let api_server_url = config.cluster_url.to_string().trim_end_matches('/').to_string();
        let client = Client::try_from(config)?;

        info!(
            cluster = %label,
            context = context.as_deref().unwrap_or("<current>"),
            api_server = %api_server_url,
            "connected to kubernetes"
        );

        Ok(Self {
            label,
            options: KubectlOptions::new(context, namespace),
            client,
            api_server_url,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }
}

/// The primary and secondary clusters of a multi-cluster run.
#[derive(Clone)]
pub struct Environment {
    pub primary: KubeContext,
    pub secondary: KubeContext,
}

impl Environment {
    pub async fn from_config(cfg: &TestConfig) -> Result<Self, Error> {
        let primary =
            KubeContext::connect("primary", cfg.kube_context.clone(), &cfg.kube_namespace).await?;
        let secondary = KubeContext::connect(
            "secondary",
            cfg.secondary_kube_context.clone(),
            &cfg.secondary_kube_namespace,
        )
        .await?;
        Ok(Self { primary, secondary })
    }
}
