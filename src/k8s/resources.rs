//! Typed Kubernetes object operations (kube-rs).

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Endpoints, Node, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use tracing::{debug, info};

use super::KubeContext;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Secret data is stored base64-encoded by the API server; k8s-openapi hands
/// us the decoded bytes.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).to_string())
        .filter(|v| !v.is_empty())
}

/// Treats 404 on delete as success.
fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), Error> {
    match result {
        Ok(()) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Binds `service_account` to `system:auth-delegator` so that Vault can use
/// its token to call the TokenReview API of this cluster.
pub async fn create_auth_delegator_binding(
    ctx: &KubeContext,
    name: &str,
    service_account: &str,
) -> Result<(), Error> {
    let api: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "system:auth-delegator".to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(ctx.namespace().to_string()),
            ..Default::default()
        }]),
    };
    info!(cluster = %ctx.label, binding = %name, "creating ClusterRoleBinding");
    api.create(&PostParams::default(), &binding).await?;
    Ok(())
}

pub async fn delete_cluster_role_binding(ctx: &KubeContext, name: &str) -> Result<(), Error> {
    let api: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
}

pub async fn create_service_account(ctx: &KubeContext, name: &str) -> Result<(), Error> {
    let api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    let sa = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    info!(cluster = %ctx.label, service_account = %name, "creating ServiceAccount");
    api.create(&PostParams::default(), &sa).await?;
    Ok(())
}

pub async fn delete_service_account(ctx: &KubeContext, name: &str) -> Result<(), Error> {
    let api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
}

pub async fn get_secret(ctx: &KubeContext, name: &str) -> Result<Secret, Error> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    Ok(api.get(name).await?)
}

pub async fn create_secret(ctx: &KubeContext, secret: &Secret) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    api.create(&PostParams::default(), secret).await?;
    Ok(())
}

pub async fn delete_secret(ctx: &KubeContext, name: &str) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
}

/// Builds an Opaque/TLS secret from string data.
pub fn string_secret(name: &str, type_: Option<&str>, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        type_: type_.map(str::to_string),
        string_data: Some(data),
        ..Default::default()
    }
}

/// Copies a secret from one cluster to another, dropping server-managed metadata.
pub async fn copy_secret(from: &KubeContext, to: &KubeContext, name: &str) -> Result<(), Error> {
    info!(
        secret = %name,
        from = %from.label,
        to = %to.label,
        "copying secret between clusters"
    );
    let source = get_secret(from, name).await?;
    let copy = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(to.namespace().to_string()),
            labels: source.metadata.labels.clone(),
            annotations: source.metadata.annotations.clone(),
            ..Default::default()
        },
        type_: source.type_.clone(),
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        immutable: source.immutable,
    };
    create_secret(to, &copy).await
}

/// Token and CA certificate minted for a service account.
#[derive(Debug, Clone)]
pub struct ServiceAccountToken {
    pub secret_name: String,
    pub token: String,
    pub ca_cert: String,
}

/// Creates a long-lived `kubernetes.io/service-account-token` secret for
/// `service_account` and waits for the token controller to populate it.
pub async fn create_service_account_token(
    ctx: &KubeContext,
    service_account: &str,
) -> Result<ServiceAccountToken, Error> {
    let secret_name = format!("{}-token", service_account);
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            annotations: Some(BTreeMap::from([(
                "kubernetes.io/service-account.name".to_string(),
                service_account.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("kubernetes.io/service-account-token".to_string()),
        ..Default::default()
    };
    info!(cluster = %ctx.label, secret = %secret_name, "creating service account token");
    create_secret(ctx, &secret).await?;

    read_service_account_token(ctx, &secret_name).await
}

async fn read_service_account_token(
    ctx: &KubeContext,
    secret_name: &str,
) -> Result<ServiceAccountToken, Error> {
    let retry = RetryConfig::fixed(30, Duration::from_secs(1));
    retry_with_backoff(&retry, "service account token", || async {
        let secret = get_secret(ctx, secret_name).await?;
        match (secret_value(&secret, "token"), secret_value(&secret, "ca.crt")) {
            (Some(token), Some(ca_cert)) => Ok(ServiceAccountToken {
                secret_name: secret_name.to_string(),
                token,
                ca_cert,
            }),
            _ => Err(Error::unexpected(format!(
                "secret {} has not been populated yet",
                secret_name
            ))),
        }
    })
    .await
}

/// Host through which other clusters reach `service` in `ctx`.
///
/// On kind the service is a NodePort and the node's internal IP is used;
/// otherwise the LoadBalancer ingress is awaited.
pub async fn service_host(ctx: &KubeContext, service: &str, use_kind: bool) -> Result<String, Error> {
    if use_kind {
        return node_internal_ip(ctx).await;
    }

    let api: Api<Service> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    let retry = RetryConfig::fixed(60, Duration::from_secs(5));
    retry_with_backoff(&retry, "load balancer ingress", || async {
        let svc = api.get(service).await?;
        svc.status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|ingress| ingress.first())
            .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()))
            .ok_or_else(|| {
                Error::unexpected(format!("service {} has no load balancer ingress yet", service))
            })
    })
    .await
}

async fn node_internal_ip(ctx: &KubeContext) -> Result<String, Error> {
    let api: Api<Node> = Api::all(ctx.client.clone());
    let nodes = api.list(&ListParams::default()).await?;
    nodes
        .items
        .iter()
        .filter_map(|n| n.status.as_ref()?.addresses.as_ref())
        .flatten()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
        .ok_or_else(|| Error::unexpected(format!("no node with an InternalIP in {}", ctx.label)))
}

/// URL of this cluster's API server as reachable from another cluster.
///
/// The kubeconfig of a kind cluster points at localhost, so on kind the
/// address of the `default/kubernetes` endpoints is used instead.
pub async fn api_server_host(ctx: &KubeContext, use_kind: bool) -> Result<String, Error> {
    if !use_kind {
        return Ok(ctx.api_server_url.clone());
    }

    let api: Api<Endpoints> = Api::namespaced(ctx.client.clone(), "default");
    let endpoints = api.get("kubernetes").await?;
    let subset = endpoints
        .subsets
        .as_ref()
        .and_then(|s| s.first())
        .ok_or_else(|| Error::unexpected("kubernetes endpoints have no subsets"))?;
    let ip = subset
        .addresses
        .as_ref()
        .and_then(|a| a.first())
        .map(|a| a.ip.clone())
        .ok_or_else(|| Error::unexpected("kubernetes endpoints have no addresses"))?;
    let port = subset
        .ports
        .as_ref()
        .and_then(|p| p.first())
        .map(|p| p.port)
        .ok_or_else(|| Error::unexpected("kubernetes endpoints have no ports"))?;
    Ok(format!("https://{}:{}", ip, port))
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn pod_is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

/// Waits until at least one pod matches `selector` and all matching pods are Ready.
pub async fn wait_for_pods_ready(ctx: &KubeContext, selector: &str) -> Result<(), Error> {
    wait_for_pods(ctx, selector, "ready", pod_is_ready).await
}

/// Waits until at least one pod matches `selector` and all matching pods are Running.
pub async fn wait_for_pods_running(ctx: &KubeContext, selector: &str) -> Result<(), Error> {
    wait_for_pods(ctx, selector, "running", pod_is_running).await
}

async fn wait_for_pods(
    ctx: &KubeContext,
    selector: &str,
    state: &str,
    check: fn(&Pod) -> bool,
) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    let params = ListParams::default().labels(selector);
    let retry = RetryConfig::fixed(600, Duration::from_secs(1));

    info!(cluster = %ctx.label, selector = %selector, state = %state, "waiting for pods");
    retry_with_backoff(&retry, "pods", || async {
        let pods = api.list(&params).await?;
        if pods.items.is_empty() {
            return Err(Error::unexpected(format!("no pods match {}", selector)));
        }
        let pending: Vec<String> = pods
            .items
            .iter()
            .filter(|p| !check(p))
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        if pending.is_empty() {
            Ok(())
        } else {
            debug!(pending = ?pending, "pods not {} yet", state);
            Err(Error::unexpected(format!(
                "pods not {}: {}",
                state,
                pending.join(", ")
            )))
        }
    })
    .await
}
