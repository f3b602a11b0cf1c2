//! Effective destinations and their backend Services
//!
//! A declared destination becomes effective once its port is known: either
//! declared explicitly or taken from the app's current droplet. Destinations
//! whose port cannot be resolved yet are left out until the app is staged.

use std::collections::BTreeMap;
use std::collections::HashMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use tracing::debug;
use trellis_common::crd::{Destination, TrellisRoute, DEFAULT_DESTINATION_PROTOCOL};
use trellis_common::{Error, APP_GUID_LABEL, PROCESS_TYPE_LABEL, ROUTE_GUID_LABEL};

use crate::client::RouteKubeClient;

/// Port used when the droplet declares none
pub const FALLBACK_PORT: i32 = 8080;

/// Name of the backend Service for a destination
pub fn service_name(destination: &Destination) -> String {
    format!("s-{}", destination.guid)
}

/// Resolve the destinations that can receive traffic now.
///
/// The result keeps declaration order, every entry has a port, and missing
/// protocols default to `http1`. Apps are looked up once per call.
pub async fn resolve_effective_destinations(
    client: &dyn RouteKubeClient,
    namespace: &str,
    destinations: &[Destination],
) -> Result<Vec<Destination>, Error> {
    let mut droplet_ports: HashMap<&str, Option<i32>> = HashMap::new();
    let mut effective = Vec::with_capacity(destinations.len());

    for destination in destinations {
        let port = match destination.port {
            Some(port) => Some(port),
            None => {
                let app = destination.app_ref.name.as_str();
                match droplet_ports.get(app) {
                    Some(port) => *port,
                    None => {
                        let port = droplet_port(client, namespace, app).await?;
                        droplet_ports.insert(app, port);
                        port
                    }
                }
            }
        };

        let Some(port) = port else {
            debug!(
                destination = %destination.guid,
                app = %destination.app_ref.name,
                "port not resolvable yet, skipping destination"
            );
            continue;
        };

        effective.push(Destination {
            port: Some(port),
            protocol: Some(
                destination
                    .protocol
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DESTINATION_PROTOCOL.to_string()),
            ),
            ..destination.clone()
        });
    }

    Ok(effective)
}

/// Port from the app's current droplet; `None` while the app is unstaged
async fn droplet_port(
    client: &dyn RouteKubeClient,
    namespace: &str,
    app_name: &str,
) -> Result<Option<i32>, Error> {
    let Some(app) = client.get_app(namespace, app_name).await? else {
        return Ok(None);
    };
    let Some(build_name) = app.current_droplet() else {
        return Ok(None);
    };
    let Some(build) = client.get_build(namespace, build_name).await? else {
        return Ok(None);
    };
    Ok(build
        .droplet()
        .map(|droplet| droplet.ports.first().copied().unwrap_or(FALLBACK_PORT)))
}

/// Backend Service for an effective destination, controller-owned by `route`
pub fn build_service(route: &TrellisRoute, destination: &Destination) -> Result<Service, Error> {
    let port = destination.port.ok_or_else(|| {
        Error::validation_for(
            route.name_any(),
            format!("destination {} has no resolved port", destination.guid),
        )
    })?;
    let owner = route.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation_for(route.name_any(), "route has no uid to own services with")
    })?;

    let labels = BTreeMap::from([
        (APP_GUID_LABEL.to_string(), destination.app_ref.name.clone()),
        (ROUTE_GUID_LABEL.to_string(), route.name_any()),
    ]);
    let selector = BTreeMap::from([
        (APP_GUID_LABEL.to_string(), destination.app_ref.name.clone()),
        (PROCESS_TYPE_LABEL.to_string(), destination.process_type.clone()),
    ]);

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(service_name(destination)),
            namespace: route.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
