//! wanfed-vault - Consul WAN federation with Vault as the secrets backend
//!
//! This crate drives an end-to-end scenario across two Kubernetes clusters:
//! a Vault server is installed in the primary cluster and exposed to the
//! secondary, Vault is bootstrapped with the secrets, PKI engines and
//! Kubernetes auth roles both Consul datacenters need, and two Consul
//! datacenters are installed and federated through mesh gateways. The run
//! finishes by verifying federation and a cross-datacenter service call.
//!
//! ## Layout
//!
//! - `federation` module - the scenario itself and the Helm values it renders
//! - `vault` module - Vault HTTP client and the Helm-installed Vault cluster
//! - `consul` module - Consul HTTP client and the Helm-installed Consul cluster
//! - `k8s` module - kubectl/helm runners, port-forwards and typed resources
//! - `cleanup` module - ordered teardown honouring `no_cleanup_on_failure`
//! - `cli` module - command-line entry points

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod consul;
pub mod error;
pub mod federation;
pub mod helpers;
pub mod k8s;
pub mod retry;
pub mod vault;

pub use config::TestConfig;
pub use error::Error;
pub use federation::{run, FederationReport, Outcome};

/// Initialize logging for tests and library consumers that have not set up
/// a subscriber of their own.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer() // This ensures output goes to both stdout and test output
        .try_init();
}
