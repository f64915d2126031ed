//! Helm values for the four releases of a federated run.
//!
//! Pure functions: they only render key-paths, so they can be inspected
//! without a cluster (see the `render-values` subcommand).

use crate::config::TestConfig;
use crate::helpers::HelmValues;
use crate::vault::ca_secret_name;

pub const VAULT_NODE_PORT: &str = "31000";
pub const MESH_GATEWAY_NODE_PORT: &str = "30000";
/// Auth method path the secondary datacenter logs in through.
pub const SECONDARY_AUTH_PATH: &str = "kubernetes-dc2";

pub const GOSSIP_SECRET_PATH: &str = "consul/data/secret/gossip";
pub const GOSSIP_SECRET_KEY: &str = "gossip";
pub const REPLICATION_SECRET_PATH: &str = "consul/data/secret/replication";
pub const REPLICATION_SECRET_KEY: &str = "replication";
pub const LICENSE_SECRET_PATH: &str = "consul/data/secret/enterpriselicense";
pub const LICENSE_SECRET_KEY: &str = "enterpriselicense";
pub const PKI_CA_CERT_PATH: &str = "pki/cert/ca";

/// Switches from the suite configuration that change the rendered values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueFlags {
    pub enterprise: bool,
    pub use_kind: bool,
}

impl From<&TestConfig> for ValueFlags {
    fn from(cfg: &TestConfig) -> Self {
        Self {
            enterprise: cfg.enable_enterprise,
            use_kind: cfg.use_kind,
        }
    }
}

/// The Vault server in the primary is exposed so the secondary can reach it.
pub fn primary_vault_values(use_kind: bool) -> HelmValues {
    let mut values = HelmValues::new();
    if use_kind {
        values
            .insert("server.service.type", "NodePort")
            .insert("server.service.nodePort", VAULT_NODE_PORT);
    } else {
        values.insert("server.service.type", "LoadBalancer");
    }
    values
}

/// The secondary only runs the agent injector, pointed at the primary's server.
pub fn secondary_vault_values(external_vault_address: &str) -> HelmValues {
    let mut values = HelmValues::new();
    values
        .insert("server.enabled", "false")
        .insert("injector.externalVaultAddr", external_vault_address)
        .insert("injector.authPath", format!("auth/{}", SECONDARY_AUTH_PATH));
    values
}

fn consul_values(datacenter: &str, vault_release: &str, server_cert_path: &str, flags: ValueFlags) -> HelmValues {
    let ca_secret = ca_secret_name(vault_release);
    let mut values = HelmValues::new();
    values
        .insert("global.datacenter", datacenter)
        .insert("global.federation.enabled", "true")
        // TLS
        .insert("global.tls.enabled", "true")
        .insert("global.tls.enableAutoEncrypt", "true")
        .insert("global.tls.caCert.secretName", PKI_CA_CERT_PATH)
        .insert("server.serverCert.secretName", server_cert_path)
        // Gossip
        .insert("global.gossipEncryption.secretName", GOSSIP_SECRET_PATH)
        .insert("global.gossipEncryption.secretKey", GOSSIP_SECRET_KEY)
        // ACLs
        .insert("global.acls.manageSystemACLs", "true")
        .insert("global.acls.replicationToken.secretName", REPLICATION_SECRET_PATH)
        .insert("global.acls.replicationToken.secretKey", REPLICATION_SECRET_KEY)
        // Mesh
        .insert("connectInject.enabled", "true")
        .insert("meshGateway.enabled", "true")
        .insert("meshGateway.replicas", "1")
        // Vault CA mounted into the servers
        .insert("server.extraVolumes[0].type", "secret")
        .insert("server.extraVolumes[0].name", ca_secret.as_str())
        .insert("server.extraVolumes[0].load", "false")
        // Secrets backend
        .insert("global.secretsBackend.vault.enabled", "true")
        .insert("global.secretsBackend.vault.consulServerRole", "consul-server")
        .insert("global.secretsBackend.vault.consulClientRole", "consul-client")
        .insert("global.secretsBackend.vault.consulCARole", "consul-ca")
        .insert("global.secretsBackend.vault.manageSystemACLsRole", "server-acl-init")
        .insert("global.secretsBackend.vault.ca.secretName", ca_secret.as_str())
        .insert("global.secretsBackend.vault.ca.secretKey", "tls.crt")
        .insert("global.secretsBackend.vault.connectCA.rootPKIPath", "connect_root")
        .insert(
            "global.secretsBackend.vault.connectCA.intermediatePKIPath",
            format!("{}/connect_inter", datacenter),
        );

    if flags.enterprise {
        values
            .insert("global.enterpriseLicense.secretName", LICENSE_SECRET_PATH)
            .insert("global.enterpriseLicense.secretKey", LICENSE_SECRET_KEY);
    }
    if flags.use_kind {
        values
            .insert("meshGateway.service.type", "NodePort")
            .insert("meshGateway.service.nodePort", MESH_GATEWAY_NODE_PORT);
    }
    values
}

/// dc1: creates the replication token and runs the CRD controller.
pub fn primary_consul_values(
    vault_release: &str,
    server_cert_path: &str,
    vault_address: &str,
    flags: ValueFlags,
) -> HelmValues {
    let mut values = consul_values("dc1", vault_release, server_cert_path, flags);
    values
        .insert("global.acls.createReplicationToken", "true")
        .insert("controller.enabled", "true")
        .insert("global.secretsBackend.vault.connectCA.address", vault_address);
    values
}

/// dc2: federates with dc1 through its mesh gateway and reaches Vault through
/// the external address, verifying the server certificate by service name.
pub fn secondary_consul_values(
    vault_release: &str,
    server_cert_path: &str,
    external_vault_address: &str,
    primary_gateway: &str,
    flags: ValueFlags,
) -> HelmValues {
    let tls_server_name = format!("{}-vault", vault_release);
    let mut values = consul_values("dc2", vault_release, server_cert_path, flags);
    values
        .insert("global.federation.primaryDatacenter", "dc1")
        .insert("global.federation.primaryGateways[0]", primary_gateway)
        .insert(
            "global.secretsBackend.vault.agentAnnotations",
            format!("vault.hashicorp.com/tls-server-name: {}", tls_server_name),
        )
        .insert("global.secretsBackend.vault.connectCA.address", external_vault_address)
        .insert("global.secretsBackend.vault.connectCA.authMethodPath", SECONDARY_AUTH_PATH)
        .insert(
            "global.secretsBackend.vault.connectCA.additionalConfig",
            format!(
                r#""{{"connect": [{{"ca_config": [{{"tls_server_name": "{}"}}]}}]}}""#,
                tls_server_name
            ),
        );
    values
}
