//! TrellisApp and TrellisBuild Custom Resource Definitions
//!
//! Only the fields the route controller reads are modelled: an app points at
//! its current droplet (a staged build), and a staged build records the
//! process types and ports it exposes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use super::route::AppRef;

/// Reference to the build holding an app's current droplet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DropletRef {
    /// Build name; empty when the app has not been staged
    #[serde(default)]
    pub name: String,
}

/// Specification for a TrellisApp
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "TrellisApp",
    plural = "trellisapps",
    shortname = "tapp",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrellisAppSpec {
    /// Human-readable app name
    #[serde(default)]
    pub display_name: String,

    /// Build whose droplet is currently deployed
    #[serde(default)]
    pub current_droplet_ref: DropletRef,
}

/// Specification for a TrellisBuild
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "TrellisBuild",
    plural = "trellisbuilds",
    shortname = "tbuild",
    namespaced,
    status = "TrellisBuildStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TrellisBuildSpec {
    /// App this build stages
    pub app_ref: AppRef,
}

/// Status of a TrellisBuild
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrellisBuildStatus {
    /// Staged droplet; absent until staging succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub droplet: Option<BuildDropletStatus>,
}

/// Output of a successful staging
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildDropletStatus {
    /// Process types the droplet can run
    #[serde(default)]
    pub process_types: Vec<String>,

    /// Ports the droplet listens on
    #[serde(default)]
    pub ports: Vec<i32>,
}

impl TrellisApp {
    /// Name of the build holding the current droplet, if the app is staged
    pub fn current_droplet(&self) -> Option<&str> {
        let name = self.spec.current_droplet_ref.name.as_str();
        (!name.is_empty()).then_some(name)
    }
}

impl TrellisBuild {
    /// The staged droplet, if staging has completed
    pub fn droplet(&self) -> Option<&BuildDropletStatus> {
        self.status.as_ref().and_then(|s| s.droplet.as_ref())
    }
}
