//! Cross-datacenter federation check.

use std::time::Duration;

use tracing::info;

use crate::consul::health::{aggregated_status, HealthStatus};
use crate::consul::{ConsulClient, ConsulError};
use crate::retry::{retry_with_backoff, RetryConfig};

pub const FEDERATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const FEDERATION_WAIT: Duration = Duration::from_secs(1);

/// Name of the first server node of a Consul release.
pub fn server_node_name(release: &str) -> String {
    format!("{}-consul-server-0", release)
}

async fn check_remote_server(
    client: &ConsulClient,
    node: &str,
    remote_dc: &str,
) -> Result<(), ConsulError> {
    let checks = client.health_node(node, remote_dc).await?;
    match aggregated_status(&checks) {
        HealthStatus::Passing => Ok(()),
        status => Err(ConsulError::NotFederated(format!(
            "{} in {} is {} as seen from {}",
            node,
            remote_dc,
            status,
            client.addr()
        ))),
    }
}

/// One attempt of the federation check.
pub async fn check_federation(
    primary: &ConsulClient,
    secondary: &ConsulClient,
    release: &str,
    secure: bool,
) -> Result<(), ConsulError> {
    let node = server_node_name(release);
    check_remote_server(primary, &node, "dc2").await?;
    check_remote_server(secondary, &node, "dc1").await?;

    if secure {
        let replication = secondary.acl_replication().await?;
        if !(replication.enabled && replication.running) {
            return Err(ConsulError::NotFederated(format!(
                "ACL replication enabled={} running={}",
                replication.enabled, replication.running
            )));
        }
    }
    Ok(())
}

/// Waits until each datacenter sees the other's server as healthy and, when
/// ACLs are on, the secondary replicates them.
pub async fn verify_federation(
    primary: &ConsulClient,
    secondary: &ConsulClient,
    release: &str,
    secure: bool,
) -> Result<(), ConsulError> {
    verify_federation_with(
        primary,
        secondary,
        release,
        secure,
        &RetryConfig::timer(FEDERATION_TIMEOUT, FEDERATION_WAIT),
    )
    .await
}

pub async fn verify_federation_with(
    primary: &ConsulClient,
    secondary: &ConsulClient,
    release: &str,
    secure: bool,
    retry: &RetryConfig,
) -> Result<(), ConsulError> {
    retry_with_backoff(retry, "federation", || {
        check_federation(primary, secondary, release, secure)
    })
    .await?;
    info!(release = %release, "datacenters federated");
    Ok(())
}
