//! Health check results and their aggregation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Check ID of node maintenance mode.
pub const NODE_MAINTENANCE: &str = "_node_maintenance";
/// Check ID prefix of service maintenance mode.
pub const SERVICE_MAINTENANCE_PREFIX: &str = "_service_maintenance:";

/// One entry of `/v1/health/node/<node>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub node: String,
    #[serde(rename = "CheckID", default)]
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Maintenance,
    /// A check reported a status Consul does not define.
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Maintenance => "maintenance",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

fn is_maintenance(check: &HealthCheck) -> bool {
    check.check_id == NODE_MAINTENANCE || check.check_id.starts_with(SERVICE_MAINTENANCE_PREFIX)
}

/// Folds a node's checks into one status.
///
/// Maintenance wins over critical, critical over warning, warning over
/// passing. Any unrecognised status makes the result unknown, and no checks
/// at all count as passing.
pub fn aggregated_status(checks: &[HealthCheck]) -> HealthStatus {
    let mut warning = false;
    let mut critical = false;
    let mut maintenance = false;

    for check in checks {
        if is_maintenance(check) {
            maintenance = true;
            continue;
        }
        match check.status.as_str() {
            "passing" => {}
            "warning" => warning = true,
            "critical" => critical = true,
            _ => return HealthStatus::Unknown,
        }
    }

    if maintenance {
        HealthStatus::Maintenance
    } else if critical {
        HealthStatus::Critical
    } else if warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Passing
    }
}
