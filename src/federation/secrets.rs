//! Vault state the Consul releases read through the secrets backend.
//!
//! Each function writes a secret or a PKI setup together with the policy
//! granting access to it, and the kubernetes auth roles binding Consul's
//! service accounts to those policies.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::federation::values::{
    GOSSIP_SECRET_KEY, GOSSIP_SECRET_PATH, LICENSE_SECRET_KEY, LICENSE_SECRET_PATH,
    REPLICATION_SECRET_KEY, REPLICATION_SECRET_PATH,
};
use crate::vault::auth::{write_kubernetes_role, KubernetesRole};
use crate::vault::pki::{generate_root, mount_pki, write_role, PkiRole};
use crate::vault::VaultClient;
use crate::Error;

pub const GOSSIP_POLICY: &str = "consul-gossip";
pub const LICENSE_POLICY: &str = "consul-enterpriselicense";
pub const CA_POLICY: &str = "consul-ca";
pub const REPLICATION_POLICY: &str = "consul-replication-token";

const PKI_MOUNT: &str = "pki";
const PKI_TTL: &str = "87600h";
const SERVER_CERT_MAX_TTL: &str = "1h";

fn read_policy(path: &str) -> String {
    format!(
        r#"path "{}" {{
  capabilities = ["read"]
}}"#,
        path
    )
}

/// 32 random bytes, base64 encoded, as `consul keygen` produces.
pub fn generate_gossip_key() -> Result<String, Error> {
    let mut key = [0u8; 32];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| Error::unexpected("failed to generate gossip key"))?;
    Ok(STANDARD.encode(key))
}

async fn write_kv(vault: &VaultClient, path: &str, key: &str, value: &str) -> Result<(), Error> {
    vault.write(path, json!({ "data": { key: value } })).await?;
    Ok(())
}

/// Stores a fresh gossip encryption key and returns it.
pub async fn configure_gossip_secret(vault: &VaultClient) -> Result<String, Error> {
    vault.put_policy(GOSSIP_POLICY, &read_policy(GOSSIP_SECRET_PATH)).await?;
    let key = generate_gossip_key()?;
    write_kv(vault, GOSSIP_SECRET_PATH, GOSSIP_SECRET_KEY, &key).await?;
    info!("gossip key stored in vault");
    Ok(key)
}

pub async fn configure_enterprise_license(vault: &VaultClient, license: &str) -> Result<(), Error> {
    vault.put_policy(LICENSE_POLICY, &read_policy(LICENSE_SECRET_PATH)).await?;
    write_kv(vault, LICENSE_SECRET_PATH, LICENSE_SECRET_KEY, license).await?;
    info!("enterprise license stored in vault");
    Ok(())
}

/// Roles for the Consul client, server and CA service accounts of
/// `consul_release` in `namespace`, logging in through `auth_path`.
pub fn kubernetes_auth_roles(
    consul_release: &str,
    namespace: &str,
    datacenter: &str,
    enterprise: bool,
) -> Vec<KubernetesRole> {
    let mut common = GOSSIP_POLICY.to_string();
    if enterprise {
        common.push(',');
        common.push_str(LICENSE_POLICY);
    }
    let server_policies = format!(
        "{},connect-ca-{dc},consul-server-{dc},{}",
        common,
        REPLICATION_POLICY,
        dc = datacenter
    );

    vec![
        KubernetesRole::new(
            "consul-client",
            format!("{}-consul-client", consul_release),
            namespace,
            common.clone(),
        ),
        KubernetesRole::new(
            "consul-server",
            format!("{}-consul-server", consul_release),
            namespace,
            server_policies,
        ),
        KubernetesRole::new(
            "consul-ca",
            format!("{}-consul-*", consul_release),
            namespace,
            CA_POLICY,
        ),
    ]
}

pub async fn configure_kubernetes_auth_roles(
    vault: &VaultClient,
    consul_release: &str,
    namespace: &str,
    auth_path: &str,
    datacenter: &str,
    enterprise: bool,
) -> Result<(), Error> {
    for role in kubernetes_auth_roles(consul_release, namespace, datacenter, enterprise) {
        write_kubernetes_role(vault, auth_path, &role).await?;
    }
    Ok(())
}

/// Root CA shared by both datacenters, readable through the `consul-ca` policy.
pub async fn configure_pki_ca(vault: &VaultClient) -> Result<(), Error> {
    mount_pki(vault, PKI_MOUNT, PKI_TTL).await?;
    generate_root(vault, PKI_MOUNT, "Consul CA", PKI_TTL).await?;
    vault
        .put_policy(CA_POLICY, &read_policy(&format!("{}/cert/ca", PKI_MOUNT)))
        .await?;
    Ok(())
}

/// Names a server certificate of `consul_release` in `datacenter` may carry.
pub fn server_cert_domains(consul_release: &str, namespace: &str, datacenter: &str) -> Vec<String> {
    let server = format!("{}-consul-server", consul_release);
    vec![
        format!("{}.consul", datacenter),
        server.clone(),
        format!("{}.{}", server, namespace),
        format!("{}.{}.svc", server, namespace),
    ]
}

pub fn server_cert_role(datacenter: &str) -> String {
    format!("consul-server-{}", datacenter)
}

/// Path the Consul servers of `datacenter` request their certificates from.
pub fn server_cert_issue_path(datacenter: &str) -> String {
    format!("{}/issue/{}", PKI_MOUNT, server_cert_role(datacenter))
}

/// Creates the issuing role and policy for the servers of `datacenter` and
/// returns the issue path to hand to the chart.
pub async fn configure_pki_certificates(
    vault: &VaultClient,
    consul_release: &str,
    namespace: &str,
    datacenter: &str,
) -> Result<String, Error> {
    let name = server_cert_role(datacenter);
    let role = PkiRole::new(
        name.as_str(),
        &server_cert_domains(consul_release, namespace, datacenter),
        SERVER_CERT_MAX_TTL,
    );
    let issue_path = write_role(vault, PKI_MOUNT, &role).await?;

    let policy = format!(
        r#"path "{}" {{
  capabilities = ["create", "update"]
}}"#,
        issue_path
    );
    vault.put_policy(&name, &policy).await?;
    Ok(issue_path)
}

/// Stores a new ACL replication token and lets `server-acl-init` read and
/// update it from every `(auth path, namespace)` binding. Returns the token.
pub async fn configure_replication_token(
    vault: &VaultClient,
    consul_release: &str,
    bindings: &[(&str, &str)],
) -> Result<String, Error> {
    let policy = format!(
        r#"path "{}" {{
  capabilities = ["read", "update"]
}}"#,
        REPLICATION_SECRET_PATH
    );
    vault.put_policy(REPLICATION_POLICY, &policy).await?;

    let token = Uuid::new_v4().to_string();
    write_kv(vault, REPLICATION_SECRET_PATH, REPLICATION_SECRET_KEY, &token).await?;

    for (auth_path, namespace) in bindings {
        let role = KubernetesRole::new(
            "server-acl-init",
            format!("{}-consul-server-acl-init", consul_release),
            *namespace,
            REPLICATION_POLICY,
        );
        write_kubernetes_role(vault, auth_path, &role).await?;
    }
    info!("replication token stored in vault");
    Ok(token)
}

/// Policy letting the servers of `datacenter` manage the Connect CA mounts.
pub fn connect_ca_policy(datacenter: &str) -> String {
    let crudl = r#"capabilities = [ "create", "read", "update", "delete", "list" ]"#;
    format!(
        r#"path "/sys/mounts" {{
  capabilities = [ "read" ]
}}
path "/sys/mounts/connect_root" {{
  {crudl}
}}
path "/sys/mounts/{dc}/connect_inter" {{
  {crudl}
}}
path "/connect_root/*" {{
  {crudl}
}}
path "/{dc}/connect_inter/*" {{
  {crudl}
}}"#,
        crudl = crudl,
        dc = datacenter
    )
}

pub async fn create_connect_ca_policy(vault: &VaultClient, datacenter: &str) -> Result<(), Error> {
    vault
        .put_policy(&format!("connect-ca-{}", datacenter), &connect_ca_policy(datacenter))
        .await?;
    Ok(())
}
