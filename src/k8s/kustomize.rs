//! Kustomize-based workload deployment and the cross-cluster connectivity check.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use super::command::run_kubectl;
use super::KubeContext;
use crate::cleanup::CleanupStack;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

pub const CONNECTION_CHECK_ATTEMPTS: u32 = 30;
pub const CONNECTION_CHECK_WAIT: Duration = Duration::from_secs(2);

fn dir_arg(dir: &Path) -> String {
    dir.to_string_lossy().to_string()
}

pub async fn kubectl_apply_k(ctx: &KubeContext, dir: &Path) -> Result<(), Error> {
    info!(cluster = %ctx.label, dir = %dir.display(), "kubectl apply -k");
    run_kubectl(&ctx.options, &["apply", "-k", &dir_arg(dir)]).await?;
    Ok(())
}

pub async fn kubectl_delete_k(ctx: &KubeContext, dir: &Path) -> Result<(), Error> {
    info!(cluster = %ctx.label, dir = %dir.display(), "kubectl delete -k");
    run_kubectl(&ctx.options, &["delete", "-k", &dir_arg(dir)]).await?;
    Ok(())
}

#[derive(Deserialize)]
struct ManifestHeader {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: ManifestMetadata,
}

#[derive(Deserialize, Default)]
struct ManifestMetadata {
    #[serde(default)]
    name: String,
}

/// Name of the first Deployment in rendered kustomize output.
pub fn deployment_name(rendered: &str) -> Result<String, Error> {
    for document in serde_yaml::Deserializer::from_str(rendered) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let header: ManifestHeader = serde_yaml::from_value(value)?;
        if header.kind == "Deployment" && !header.metadata.name.is_empty() {
            return Ok(header.metadata.name);
        }
    }
    Err(Error::unexpected("kustomization renders no Deployment"))
}

/// Applies the kustomization in `dir`, registers its removal (dumping pod
/// state first when the run failed) and waits for its Deployment to become
/// available.
pub async fn deploy_kustomize(
    ctx: &KubeContext,
    cleanup: &mut CleanupStack,
    debug_directory: Option<PathBuf>,
    dir: &Path,
) -> Result<(), Error> {
    kubectl_apply_k(ctx, dir).await?;

    let teardown_ctx = ctx.clone();
    let teardown_dir = dir.to_path_buf();
    cleanup.retain_on_failure(
        format!("{}: kustomize {}", ctx.label, dir.display()),
        move |failed| async move {
            if failed {
                if let Some(debug_dir) = debug_directory {
                    if let Err(e) = write_pods_debug_info(&teardown_ctx, &debug_dir).await {
                        warn!(error = %e, "failed to write pod debug info");
                    }
                }
            }
            kubectl_delete_k(&teardown_ctx, &teardown_dir).await
        },
    );

    let rendered = run_kubectl(&ctx.options, &["kustomize", &dir_arg(dir)]).await?;
    let deployment = deployment_name(&rendered)?;

    info!(cluster = %ctx.label, deployment = %deployment, "waiting for deployment");
    run_kubectl(
        &ctx.options,
        &[
            "wait",
            "--for=condition=available",
            "--timeout=5m",
            &format!("deploy/{}", deployment),
        ],
    )
    .await?;
    Ok(())
}

/// Curls `url` from inside `deploy/<client_app>` until it answers.
pub async fn check_static_server_connection(
    ctx: &KubeContext,
    client_app: &str,
    url: &str,
) -> Result<(), Error> {
    let target = format!("deploy/{}", client_app);
    let retry = RetryConfig::fixed(CONNECTION_CHECK_ATTEMPTS, CONNECTION_CHECK_WAIT);
    retry_with_backoff(&retry, "static server connection", || async {
        run_kubectl(
            &ctx.options,
            &["exec", &target, "-c", client_app, "--", "curl", "-vvvsSf", url],
        )
        .await
    })
    .await?;
    info!(cluster = %ctx.label, from = %client_app, url = %url, "connection successful");
    Ok(())
}

/// Writes `pods.yaml` and one log file per pod under `<dir>/<cluster label>/`.
pub async fn write_pods_debug_info(ctx: &KubeContext, dir: &Path) -> Result<(), Error> {
    let out = dir.join(&ctx.label);
    tokio::fs::create_dir_all(&out).await?;

    let pods = run_kubectl(&ctx.options, &["get", "pods", "-o", "yaml"]).await?;
    tokio::fs::write(out.join("pods.yaml"), &pods).await?;

    let names = run_kubectl(
        &ctx.options,
        &["get", "pods", "-o", "jsonpath={.items[*].metadata.name}"],
    )
    .await?;
    for pod in names.split_whitespace() {
        match run_kubectl(&ctx.options, &["logs", pod, "--all-containers"]).await {
            Ok(logs) => tokio::fs::write(out.join(format!("{}.log", pod)), logs).await?,
            Err(e) => warn!(pod = %pod, error = %e, "could not fetch logs"),
        }
    }
    info!(cluster = %ctx.label, dir = %out.display(), "wrote pod debug info");
    Ok(())
}
