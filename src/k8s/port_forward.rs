//! `kubectl port-forward` tunnels from the test runner into a cluster.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::command::KubectlOptions;
use crate::Error;

const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// A running port-forward. The kubectl process is killed on drop.
#[derive(Debug)]
pub struct PortForward {
    local_port: u16,
    _child: Child,
}

impl PortForward {
    /// Forwards an ephemeral local port to `remote_port` of `target`
    /// (e.g. `pod/vault-0`).
    pub async fn start(options: &KubectlOptions, target: &str, remote_port: u16) -> Result<Self, Error> {
        let mut args = options.kubectl_args();
        args.push("port-forward".to_string());
        args.push(target.to_string());
        args.push(format!(":{}", remote_port));

        let mut child = Command::new("kubectl")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::unexpected("port-forward has no stdout"))?;
        let mut lines = BufReader::new(stdout).lines();

        let local_port = tokio::time::timeout(READY_TIMEOUT, async {
            while let Some(line) = lines.next_line().await? {
                debug!(line = %line, "port-forward output");
                if let Some(port) = parse_forwarding_line(&line) {
                    return Ok(port);
                }
            }
            Err(Error::CommandFailed {
                command: format!("kubectl {}", args.join(" ")),
                message: "port-forward exited before it was ready".to_string(),
            })
        })
        .await
        .map_err(|_| Error::timeout(format!("port-forward to {}", target), READY_TIMEOUT))??;

        // Keep draining stdout so kubectl never blocks on a full pipe.
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

        info!(target = %target, local_port, remote_port, "port-forward ready");
        Ok(Self {
            local_port,
            _child: child,
        })
    }

    /// `scheme://127.0.0.1:<local port>`
    pub fn url(&self, scheme: &str) -> String {
        format!("{}://127.0.0.1:{}", scheme, self.local_port)
    }
}

/// Extracts the local port from `Forwarding from 127.0.0.1:43567 -> 8200`.
fn parse_forwarding_line(line: &str) -> Option<u16> {
    let rest = line.trim().strip_prefix("Forwarding from ")?;
    let (local, _remote) = rest.split_once(" -> ")?;
    let (_, port) = local.rsplit_once(':')?;
    port.parse().ok()
}
