//! Consul side: the Helm release wrapper, its HTTP API and the federation check.

pub mod client;
pub mod cluster;
pub mod config_entry;
pub mod error;
pub mod federation;
pub mod health;

pub use client::{AclReplicationStatus, ConsulClient};
pub use cluster::ConsulHelmCluster;
pub use config_entry::ServiceIntentions;
pub use error::ConsulError;
pub use federation::verify_federation;
pub use health::{aggregated_status, HealthCheck, HealthStatus};
