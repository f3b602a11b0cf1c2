//! Mapping from secondary-resource events to the routes they affect

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use trellis_common::crd::{HTTPProxy, TrellisApp, TrellisBuild, TrellisDomain, TrellisRoute};
use trellis_common::kube_utils::{controller_owner_name, display_key};
use trellis_reconcile::{Indexer, ObjectKey};

/// Index of routes by `<namespace>/<app>` for each destination
pub const DESTINATION_APP_INDEX: &str = "destinationAppName";

/// Index of routes by `<namespace>/<domain>` of their domain reference
pub const DOMAIN_INDEX: &str = "domainQualifiedName";

/// Values of [`DESTINATION_APP_INDEX`] for a route
pub fn destination_app_names(route: &TrellisRoute) -> Vec<String> {
    let namespace = route.namespace().unwrap_or_default();
    let mut apps: Vec<String> = route
        .spec
        .destinations
        .iter()
        .map(|d| display_key(&namespace, &d.app_ref.name))
        .collect();
    apps.sort();
    apps.dedup();
    apps
}

/// Values of [`DOMAIN_INDEX`] for a route
pub fn domain_qualified_name(route: &TrellisRoute) -> Vec<String> {
    let namespace = route.namespace().unwrap_or_default();
    vec![display_key(
        route.domain_namespace(&namespace),
        &route.spec.domain_ref.name,
    )]
}

/// Routes sending traffic to `app`
pub fn routes_for_app(indexer: &dyn Indexer, app: &TrellisApp) -> Vec<ObjectKey> {
    let Some(namespace) = app.namespace() else {
        return Vec::new();
    };
    indexer.lookup(DESTINATION_APP_INDEX, &display_key(&namespace, &app.name_any()))
}

/// Routes sending traffic to the app `build` stages
pub fn routes_for_build(indexer: &dyn Indexer, build: &TrellisBuild) -> Vec<ObjectKey> {
    let Some(namespace) = build.namespace() else {
        return Vec::new();
    };
    indexer.lookup(
        DESTINATION_APP_INDEX,
        &display_key(&namespace, &build.spec.app_ref.name),
    )
}

/// Routes on `domain`
pub fn routes_for_domain(indexer: &dyn Indexer, domain: &TrellisDomain) -> Vec<ObjectKey> {
    let Some(namespace) = domain.namespace() else {
        return Vec::new();
    };
    indexer.lookup(DOMAIN_INDEX, &display_key(&namespace, &domain.name_any()))
}

/// The route owning a child proxy, or every route an FQDN proxy includes
pub fn routes_for_proxy(proxy: &HTTPProxy) -> Vec<ObjectKey> {
    let Some(namespace) = proxy.namespace() else {
        return Vec::new();
    };
    let mut keys: Vec<ObjectKey> = controller_owner_name(&proxy.metadata, "TrellisRoute")
        .map(|owner| ObjectKey::new(&namespace, owner))
        .into_iter()
        .collect();
    keys.extend(
        proxy
            .spec
            .includes
            .iter()
            .map(|include| ObjectKey::new(&include.namespace, &include.name)),
    );
    keys.sort();
    keys.dedup();
    keys
}

/// The route owning a backend Service
pub fn routes_for_service(service: &Service) -> Vec<ObjectKey> {
    let Some(namespace) = service.namespace() else {
        return Vec::new();
    };
    controller_owner_name(&service.metadata, "TrellisRoute")
        .map(|owner| ObjectKey::new(namespace, owner))
        .into_iter()
        .collect()
}
