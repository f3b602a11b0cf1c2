//! TrellisRoute Custom Resource Definition
//!
//! A route maps an external hostname and path to one or more app processes.
//! Routes that share a hostname are folded by the route controller into a
//! single FQDN-level `HTTPProxy`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, HasConditions};

/// Protocol assumed for a destination that does not declare one
pub const DEFAULT_DESTINATION_PROTOCOL: &str = "http1";

/// Reference to the TrellisDomain a route is served under
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DomainRef {
    /// Domain name
    pub name: String,

    /// Domain namespace; defaults to the route's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to an app by name within the route's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct AppRef {
    /// App name
    pub name: String,
}

/// A backend the route sends traffic to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Immutable identifier; the backend Service name is derived from it
    pub guid: String,

    /// App whose processes receive the traffic
    pub app_ref: AppRef,

    /// Process type within the app (e.g. "web")
    pub process_type: String,

    /// Target port; resolved from the app's current droplet when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Application protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Specification for a TrellisRoute
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "TrellisRoute",
    plural = "trellisroutes",
    shortname = "troute",
    namespaced,
    status = "TrellisRouteStatus",
    printcolumn = r#"{"name":"URI","type":"string","jsonPath":".status.uri"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrellisRouteSpec {
    /// Hostname label prepended to the domain (case-insensitive)
    pub host: String,

    /// Path prefix; empty means the whole host
    #[serde(default)]
    pub path: String,

    /// Route protocol
    #[serde(default = "default_route_protocol")]
    pub protocol: String,

    /// Domain the host is qualified with
    pub domain_ref: DomainRef,

    /// Declared destinations
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

fn default_route_protocol() -> String {
    "http".to_string()
}

/// Status of a TrellisRoute
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrellisRouteStatus {
    /// Destinations with resolved ports that currently receive traffic
    #[serde(default)]
    pub destinations: Vec<Destination>,

    /// Lower-cased fully-qualified hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,

    /// FQDN followed by the path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Generation most recently reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions (Ready)
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl TrellisRoute {
    /// Status, initializing it to the default when unset
    pub fn status_mut(&mut self) -> &mut TrellisRouteStatus {
        self.status.get_or_insert_with(TrellisRouteStatus::default)
    }

    /// FQDN last published to status, if any
    pub fn fqdn(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.fqdn.as_deref())
    }

    /// Whether the route has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Namespace of the referenced domain, defaulting to `route_namespace`
    pub fn domain_namespace<'a>(&'a self, route_namespace: &'a str) -> &'a str {
        self.spec
            .domain_ref
            .namespace
            .as_deref()
            .unwrap_or(route_namespace)
    }
}

impl HasConditions for TrellisRoute {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}
