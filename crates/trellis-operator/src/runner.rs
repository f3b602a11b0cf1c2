//! Controller runner - wires watches, indexes and the engine for the route controller
//!
//! kube-runtime's `Controller` watches TrellisRoutes and schedules reconciles;
//! secondary resources are mapped back to the routes that depend on them.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::Controller;
use kube::{Api, Client};
use trellis_common::crd::{HTTPProxy, TrellisApp, TrellisBuild, TrellisDomain, TrellisRoute};
use trellis_common::ROUTE_GUID_LABEL;
use trellis_reconcile::controller::watch_config;
use trellis_reconcile::{
    error_policy, handle_result, reconcile, Indexer, KubeStore, ObjectKey, ObjectStore,
    PatchingReconciler, ReconcileContext, StoreIndexer,
};
use trellis_route::index::{
    destination_app_names, domain_qualified_name, routes_for_app, routes_for_build,
    routes_for_domain, routes_for_proxy, routes_for_service, DESTINATION_APP_INDEX, DOMAIN_INDEX,
};
use trellis_route::RouteReconciler;

use crate::config::RunArgs;

fn route_refs(keys: Vec<ObjectKey>) -> Vec<ObjectRef<TrellisRoute>> {
    keys.iter().map(ObjectKey::object_ref::<TrellisRoute>).collect()
}

/// Run the route controller until SIGTERM or ctrl-c
pub async fn run_route_controller(client: Client, args: &RunArgs) {
    let config = args.controller_config();
    let routes: Api<TrellisRoute> = Api::all(client.clone());
    let controller =
        Controller::new(routes.clone(), watch_config()).with_config(config.runtime_config());

    let indexer: Arc<dyn Indexer> = Arc::new(
        StoreIndexer::new(controller.store())
            .with_index(DESTINATION_APP_INDEX, destination_app_names)
            .with_index(DOMAIN_INDEX, domain_qualified_name),
    );

    let store: Arc<dyn ObjectStore<TrellisRoute>> = Arc::new(KubeStore::new(client.clone()));
    let reconciler = RouteReconciler::new(client.clone(), args.route_config());
    let engine = PatchingReconciler::new(store, Arc::new(reconciler));
    let ctx = Arc::new(ReconcileContext::new("trellis-route", engine, &config));

    tracing::info!("- TrellisRoute controller");

    let apps_index = indexer.clone();
    let builds_index = indexer.clone();
    let domains_index = indexer;

    controller
        // the primary watch only reports live routes; deletes come through here
        .watches(routes, watch_config(), |route: TrellisRoute| {
            ObjectKey::from_resource(&route).map(|key| key.object_ref::<TrellisRoute>())
        })
        .watches(
            Api::<TrellisApp>::all(client.clone()),
            watch_config(),
            move |app| route_refs(routes_for_app(apps_index.as_ref(), &app)),
        )
        .watches(
            Api::<TrellisBuild>::all(client.clone()),
            watch_config(),
            move |build| route_refs(routes_for_build(builds_index.as_ref(), &build)),
        )
        .watches(
            Api::<TrellisDomain>::all(client.clone()),
            watch_config(),
            move |domain| route_refs(routes_for_domain(domains_index.as_ref(), &domain)),
        )
        .watches(
            Api::<HTTPProxy>::all(client.clone()),
            watch_config(),
            |proxy| route_refs(routes_for_proxy(&proxy)),
        )
        .watches(
            Api::<Service>::all(client),
            watch_config().labels(ROUTE_GUID_LABEL),
            |service| route_refs(routes_for_service(&service)),
        )
        .shutdown_on_signal()
        .run(reconcile::<TrellisRoute>, error_policy::<TrellisRoute>, ctx.clone())
        .for_each(handle_result(ctx))
        .await;
}
