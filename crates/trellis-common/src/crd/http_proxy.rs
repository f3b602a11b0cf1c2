//! Contour `HTTPProxy` resource (projectcontour.io/v1)
//!
//! Trellis writes two shapes of HTTPProxy:
//! - an FQDN proxy with a `virtualhost` and an ordered `includes` list, shared
//!   by every route on that hostname
//! - a per-route child proxy holding a single path-prefix route rule
//!
//! Only the fields Trellis reads or writes are modelled. The CRD itself is
//! installed by Contour, never by Trellis.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an HTTPProxy
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "HTTPProxy",
    plural = "httpproxies",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPProxySpec {
    /// Hostname this proxy is the root for; absent on child proxies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualhost: Option<VirtualHost>,

    /// Child proxies delegated to, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<ProxyInclude>,

    /// Route rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<ProxyRoute>,
}

/// Root hostname configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    /// Fully-qualified hostname
    pub fqdn: String,

    /// TLS termination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ProxyTls>,
}

/// TLS configuration for a virtual host
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyTls {
    /// Certificate secret, as `name` or `namespace/name`
    pub secret_name: String,
}

/// Delegation to a child proxy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInclude {
    /// Child proxy name
    pub name: String,

    /// Child proxy namespace
    #[serde(default)]
    pub namespace: String,
}

/// Route rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRoute {
    /// Match conditions
    #[serde(default)]
    pub conditions: Vec<ProxyMatchCondition>,

    /// Upstream services
    #[serde(default)]
    pub services: Vec<ProxyService>,

    /// Allow websocket upgrades
    #[serde(default)]
    pub enable_websockets: bool,
}

/// Request match condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyMatchCondition {
    /// Path prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Upstream service reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyService {
    /// Service name in the proxy's namespace
    pub name: String,

    /// Service port
    pub port: i32,
}

impl HTTPProxy {
    /// Hostname this proxy is the root for, if it is an FQDN proxy
    pub fn fqdn(&self) -> Option<&str> {
        self.spec.virtualhost.as_ref().map(|v| v.fqdn.as_str())
    }

    /// Whether the proxy delegates to the child `name` in `namespace`
    pub fn includes_child(&self, namespace: &str, name: &str) -> bool {
        self.spec
            .includes
            .iter()
            .any(|i| i.name == name && i.namespace == namespace)
    }
}
