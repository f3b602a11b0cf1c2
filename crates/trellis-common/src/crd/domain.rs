//! TrellisDomain Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a TrellisDomain
///
/// The domain name is DNS-safe; routes qualify their host with it.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "TrellisDomain",
    plural = "trellisdomains",
    shortname = "tdomain",
    namespaced,
    printcolumn = r#"{"name":"Domain","type":"string","jsonPath":".spec.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrellisDomainSpec {
    /// Fully-qualified domain name (e.g. "apps.example.com")
    pub name: String,
}
