//! Thin wrappers around the `kubectl` and `helm` binaries.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::helpers::HelmValues;
use crate::Error;

/// Which cluster and namespace a kubectl/helm invocation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubectlOptions {
    pub context: Option<String>,
    pub namespace: String,
}

impl KubectlOptions {
    pub fn new(context: Option<String>, namespace: impl Into<String>) -> Self {
        Self {
            context,
            namespace: namespace.into(),
        }
    }

    /// Global kubectl flags for this target.
    pub fn kubectl_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ctx) = &self.context {
            args.push("--context".to_string());
            args.push(ctx.clone());
        }
        args.push("--namespace".to_string());
        args.push(self.namespace.clone());
        args
    }

    /// Global helm flags for this target (helm spells the context flag differently).
    pub fn helm_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ctx) = &self.context {
            args.push("--kube-context".to_string());
            args.push(ctx.clone());
        }
        args.push("--namespace".to_string());
        args.push(self.namespace.clone());
        args
    }
}

/// Runs a command and returns its stdout.
pub async fn run_command<S: AsRef<str>>(cmd: &str, args: &[S]) -> Result<String, Error> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    debug!(command = %cmd, args = ?args, "running command");

    let output = Command::new(cmd)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: format!("{} {}", cmd, args.join(" ")),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub async fn run_kubectl<S: AsRef<str>>(options: &KubectlOptions, args: &[S]) -> Result<String, Error> {
    let mut full_args = options.kubectl_args();
    full_args.extend(args.iter().map(|a| a.as_ref().to_string()));
    run_command("kubectl", &full_args).await
}

pub async fn run_helm<S: AsRef<str>>(options: &KubectlOptions, args: &[S]) -> Result<String, Error> {
    let mut full_args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
    full_args.extend(options.helm_args());
    run_command("helm", &full_args).await
}

pub const HASHICORP_HELM_REPO: &str = "https://helm.releases.hashicorp.com";

/// Adds the `hashicorp` chart repository when `chart` is taken from it.
pub async fn ensure_helm_repo(chart: &str) -> Result<(), Error> {
    if !chart.starts_with("hashicorp/") {
        return Ok(());
    }
    run_command(
        "helm",
        &["repo", "add", "hashicorp", HASHICORP_HELM_REPO, "--force-update"],
    )
    .await?;
    Ok(())
}

/// `helm install <release> <chart> --set ...`
pub async fn helm_install(
    options: &KubectlOptions,
    release: &str,
    chart: &str,
    values: &HelmValues,
) -> Result<(), Error> {
    ensure_helm_repo(chart).await?;
    let mut args = vec!["install".to_string(), release.to_string(), chart.to_string()];
    args.extend(values.set_args());
    info!(release = %release, chart = %chart, namespace = %options.namespace, "helm install");
    run_helm(options, &args).await?;
    Ok(())
}

pub async fn helm_uninstall(options: &KubectlOptions, release: &str) -> Result<(), Error> {
    info!(release = %release, namespace = %options.namespace, "helm uninstall");
    run_helm(options, &["uninstall", release]).await?;
    Ok(())
}
