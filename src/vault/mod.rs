//! Vault side of the federation bootstrap.
//!
//! `client` speaks the HTTP API, `init`/`auth`/`pki` hold the individual
//! operations, `tls` produces the listener certificates and `cluster` ties
//! them to a Helm release in one Kubernetes context.
//!
//! ## Testing strategy:
//! - HTTP contracts are checked against `wiremock` servers in each module
//! - Tests that need a real Vault start a dev container via `test_utils.rs`
//!   and only run when `WANFED_RUN_VAULT_TESTS` is set

pub mod auth;
pub mod client;
pub mod cluster;
pub mod common;
pub mod error;
pub mod init;
pub mod pki;
#[cfg(test)]
pub mod test_utils;
pub mod tls;

pub use client::VaultClient;
pub use cluster::{ca_secret_name, VaultCluster};
pub use error::VaultError;
pub use init::{InitResult, SealStatus};
