//! Route controller configuration

use std::str::FromStr;
use std::time::Duration;

/// What happens to an FQDN proxy once no route includes it anymore
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyParentPolicy {
    /// Keep the proxy so the hostname stays claimed by its namespace
    #[default]
    Retain,
    /// Delete the proxy, guarded by the resourceVersion it was read at
    Delete,
}

impl FromStr for EmptyParentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "delete" => Ok(Self::Delete),
            other => Err(format!(
                "unknown empty parent policy '{other}' (expected retain or delete)"
            )),
        }
    }
}

/// Settings for [`crate::RouteReconciler`]
#[derive(Clone, Debug)]
pub struct RouteConfig {
    /// TLS secret for every FQDN proxy, as `namespace/name`
    pub workloads_tls_secret: Option<String>,
    /// Fate of FQDN proxies with no remaining includes
    pub empty_parent_policy: EmptyParentPolicy,
    /// Requeue delay while the referenced domain does not exist
    pub domain_retry: Duration,
    /// Requeue delay after a failed orphaned-service sweep
    pub orphan_sweep_retry: Duration,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            workloads_tls_secret: None,
            empty_parent_policy: EmptyParentPolicy::Retain,
            domain_retry: Duration::from_secs(5),
            orphan_sweep_retry: Duration::from_secs(10),
        }
    }
}
