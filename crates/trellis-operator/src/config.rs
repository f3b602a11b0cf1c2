//! Command-line and environment configuration

use std::time::Duration;

use clap::{ArgAction, Args};
use trellis_common::telemetry::LogFormat;
use trellis_reconcile::{BackoffPolicy, ControllerConfig};
use trellis_route::{EmptyParentPolicy, RouteConfig};

/// Settings for running the controller
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Concurrent reconcile workers
    #[arg(long, env = "TRELLIS_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// TLS secret for every FQDN proxy, as `namespace/name`
    #[arg(long, env = "TRELLIS_WORKLOADS_TLS_SECRET", value_parser = parse_secret_ref)]
    pub workloads_tls_secret: Option<String>,

    /// What to do with an FQDN proxy once no route includes it (retain | delete)
    #[arg(long, env = "TRELLIS_EMPTY_PARENT_POLICY", default_value = "retain")]
    pub empty_parent_policy: EmptyParentPolicy,

    /// First retry delay for a failing route, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub backoff_base_ms: u64,

    /// Retry delay ceiling for a failing route, in seconds
    #[arg(long, default_value_t = 300)]
    pub backoff_max_secs: u64,

    /// Install or update the Trellis CRDs on startup
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub install_crds: bool,

    /// Log line format (json | text)
    #[arg(long, env = "TRELLIS_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl RunArgs {
    /// Route reconciler settings
    pub fn route_config(&self) -> RouteConfig {
        RouteConfig {
            workloads_tls_secret: self.workloads_tls_secret.clone(),
            empty_parent_policy: self.empty_parent_policy,
            ..RouteConfig::default()
        }
    }

    /// Dispatcher settings
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_secs(self.backoff_max_secs),
            },
        }
    }
}

fn parse_secret_ref(s: &str) -> Result<String, String> {
    match s.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(s.to_string())
        }
        _ => Err(format!("'{s}' is not a namespace/name secret reference")),
    }
}
