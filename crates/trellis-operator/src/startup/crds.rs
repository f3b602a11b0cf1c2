//! CRD installation utilities
//!
//! The operator installs its own CRDs on startup using server-side apply so
//! the schemas always match the running version. HTTPProxy belongs to the
//! ingress controller and is never installed here.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use trellis_common::crd::{TrellisApp, TrellisBuild, TrellisDomain, TrellisRoute};
use trellis_common::retry::{retry, RetryPolicy};
use trellis_common::{Error, FIELD_MANAGER};

/// CRD definition with name and resource
pub struct CrdDef {
    /// `<plural>.<group>`
    pub name: &'static str,
    /// Generated manifest
    pub crd: CustomResourceDefinition,
}

/// Every CRD owned by Trellis
pub fn all_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "trellisroutes.trellis.dev",
            crd: TrellisRoute::crd(),
        },
        CrdDef {
            name: "trellisdomains.trellis.dev",
            crd: TrellisDomain::crd(),
        },
        CrdDef {
            name: "trellisapps.trellis.dev",
            crd: TrellisApp::crd(),
        },
        CrdDef {
            name: "trellisbuilds.trellis.dev",
            crd: TrellisBuild::crd(),
        },
    ]
}

async fn install_crds(client: &Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in all_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await?;
    }
    Ok(())
}

/// Install all Trellis CRDs, retrying while the API server settles
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    retry(&RetryPolicy::STARTUP, "install CRDs", || install_crds(client))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install CRDs: {}", e))?;
    tracing::info!("Trellis CRDs installed/updated");
    Ok(())
}
