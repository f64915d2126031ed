//! Externally reachable addresses of the primary's Vault server and mesh gateway.

use crate::k8s::resources::service_host;
use crate::k8s::KubeContext;
use crate::Error;

pub fn vault_address(host: &str, use_kind: bool) -> String {
    let port = if use_kind { 31000 } else { 8200 };
    format!("https://{}:{}", host, port)
}

pub fn mesh_gateway_address(host: &str, use_kind: bool) -> String {
    let port = if use_kind { 30000 } else { 443 };
    format!("{}:{}", host, port)
}

/// Address the secondary cluster uses to reach Vault in `ctx`.
pub async fn external_vault_address(ctx: &KubeContext, vault_release: &str, use_kind: bool) -> Result<String, Error> {
    let host = service_host(ctx, &format!("{}-vault", vault_release), use_kind).await?;
    Ok(vault_address(&host, use_kind))
}

pub async fn primary_mesh_gateway_address(
    ctx: &KubeContext,
    consul_release: &str,
    use_kind: bool,
) -> Result<String, Error> {
    let host = service_host(ctx, &format!("{}-consul-mesh-gateway", consul_release), use_kind).await?;
    Ok(mesh_gateway_address(&host, use_kind))
}
