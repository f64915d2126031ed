use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::TestConfig;
use crate::federation::addresses::{mesh_gateway_address, vault_address};
use crate::federation::secrets::server_cert_issue_path;
use crate::federation::values::{self, ValueFlags};
use crate::federation::{self, Outcome};
use crate::helpers::{random_name, HelmValues};
use crate::vault::cluster::service_address;
use crate::vault::VaultClient;
use crate::{consul, vault};

#[derive(Parser)]
#[command(
    name = "wanfed-vault",
    about = "Consul WAN federation through mesh gateways, with Vault as the secrets backend",
    version = "0.1.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install Vault and two federated Consul datacenters, verify them, tear down.
    Run {
        #[command(flatten)]
        config: TestConfig,
    },
    /// Print the Helm values of the four releases without touching a cluster.
    RenderValues {
        #[command(flatten)]
        config: TestConfig,
        /// Vault release name (random when unset).
        #[arg(long)]
        vault_release: Option<String>,
        /// Host the secondary reaches the primary's Vault and mesh gateway on.
        #[arg(long, default_value = "127.0.0.1")]
        external_host: String,
        /// Write the values to a file instead of stdout.
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
    /// Check the seal status of a Vault server.
    VaultStatus {
        #[arg(long, default_value = "https://127.0.0.1:8200", env = "VAULT_ADDR")]
        vault_addr: String,
        /// PEM file of the CA that signed the server certificate.
        #[arg(long, env = "VAULT_CACERT")]
        ca_cert: Option<PathBuf>,
    },
}

/// Helm values of a federated run, keyed by dotted path.
#[derive(Debug, Serialize)]
pub struct RenderedValues {
    pub primary_vault: BTreeMap<String, String>,
    pub secondary_vault: BTreeMap<String, String>,
    pub primary_consul: BTreeMap<String, String>,
    pub secondary_consul: BTreeMap<String, String>,
}

fn to_map(values: &HelmValues) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Renders exactly what `run` would hand to `helm install` for each release,
/// given the externally reachable host of the primary cluster. No Consul value
/// depends on the Consul release name.
pub fn render_values(
    cfg: &TestConfig,
    vault_release: &str,
    external_host: &str,
) -> RenderedValues {
    let flags = ValueFlags::from(cfg);
    let external_vault_addr = vault_address(external_host, cfg.use_kind);
    let primary_gateway = mesh_gateway_address(external_host, cfg.use_kind);

    let mut primary_vault = vault::cluster::default_values(vault_release, cfg);
    primary_vault.merge(&values::primary_vault_values(cfg.use_kind));
    let mut secondary_vault = vault::cluster::default_values(vault_release, cfg);
    secondary_vault.merge(&values::secondary_vault_values(&external_vault_addr));

    let consul_base = {
        let mut base = consul::cluster::default_values();
        base.merge(&cfg.helm_values());
        base
    };
    let mut primary_consul = consul_base.clone();
    primary_consul.merge(&values::primary_consul_values(
        vault_release,
        &server_cert_issue_path("dc1"),
        &service_address(vault_release),
        flags,
    ));
    let mut secondary_consul = consul_base;
    secondary_consul.merge(&values::secondary_consul_values(
        vault_release,
        &server_cert_issue_path("dc2"),
        &external_vault_addr,
        &primary_gateway,
        flags,
    ));

    RenderedValues {
        primary_vault: to_map(&primary_vault),
        secondary_vault: to_map(&secondary_vault),
        primary_consul: to_map(&primary_consul),
        secondary_consul: to_map(&secondary_consul),
    }
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => match federation::run(&config).await {
            Ok(Outcome::Skipped(reason)) => {
                warn!("Run skipped: {}", reason);
            }
            Ok(Outcome::Federated(report)) => {
                info!(
                    "dc1 and dc2 federated in {}s (vault release {}, consul release {})",
                    report.elapsed_secs, report.vault_release, report.consul_release
                );
                info!("External Vault address: {}", report.external_vault_address);
                info!("Primary mesh gateway: {}", report.primary_gateway);
                if !report.cleanup.failed.is_empty() {
                    warn!("Cleanup steps failed: {:?}", report.cleanup.failed);
                }
            }
            Err(err) => {
                error!("WAN federation run failed: {}", err);
                return Err(anyhow::anyhow!("WAN federation run failed: {}", err));
            }
        },

        Commands::RenderValues {
            config,
            vault_release,
            external_host,
            output_file,
        } => {
            let vault_release = vault_release.unwrap_or_else(random_name);
            let rendered = render_values(&config, &vault_release, &external_host);
            let yaml = serde_yaml::to_string(&rendered).context("failed to render values")?;

            match output_file {
                Some(path) => {
                    fs::write(&path, yaml)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!("Values written to {}", path.display());
                }
                None => println!("{}", yaml),
            }
        }

        Commands::VaultStatus { vault_addr, ca_cert } => {
            info!("Checking status of Vault at {}", vault_addr);
            let client = match ca_cert {
                Some(path) => {
                    let pem = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    VaultClient::with_ca_pem(&vault_addr, "", &pem)?
                }
                None => VaultClient::new(&vault_addr, "")?,
            };

            match client.seal_status().await {
                Ok(status) => {
                    info!(
                        "Vault Status: Initialized: {}, Sealed: {}, Unseal progress: {}/{}",
                        status.initialized, status.sealed, status.progress, status.threshold
                    );
                    if !status.initialized {
                        info!("Vault is not initialized.");
                    } else if status.sealed {
                        info!("Vault is sealed.");
                    }
                }
                Err(e) => {
                    error!("Error checking Vault status: {}", e);
                    return Err(anyhow::anyhow!("Failed to check Vault status: {}", e));
                }
            }
        }
    }

    Ok(())
}
