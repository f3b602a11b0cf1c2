//! Test fixtures and an in-memory cluster for route controller tests

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use parking_lot::Mutex;
use trellis_common::crd::{
    AppRef, BuildDropletStatus, Destination, DomainRef, HTTPProxy, TrellisApp, TrellisAppSpec,
    TrellisBuild, TrellisBuildSpec, TrellisBuildStatus, TrellisDomain, TrellisDomainSpec,
    TrellisRoute, TrellisRouteSpec,
};
use trellis_common::{Error, ROUTE_GUID_LABEL};
use trellis_reconcile::diff::merge_apply;
use trellis_reconcile::{ObjectKey, ObjectStore, StatusPatch};

use crate::client::{fqdn_proxy_patch, RouteKubeClient};

pub const NAMESPACE: &str = "space-1";
pub const DOMAIN: &str = "apps-domain";

// =============================================================================
// Fixtures
// =============================================================================

pub fn destination(guid: &str, app: &str, port: Option<i32>) -> Destination {
    Destination {
        guid: guid.to_string(),
        app_ref: AppRef {
            name: app.to_string(),
        },
        process_type: "web".to_string(),
        port,
        protocol: None,
    }
}

pub fn route(name: &str, host: &str, path: &str, destinations: Vec<Destination>) -> TrellisRoute {
    let mut route = TrellisRoute::new(
        name,
        TrellisRouteSpec {
            host: host.to_string(),
            path: path.to_string(),
            protocol: "http".to_string(),
            domain_ref: DomainRef {
                name: DOMAIN.to_string(),
                namespace: None,
            },
            destinations,
        },
    );
    route.metadata.namespace = Some(NAMESPACE.to_string());
    route.metadata.uid = Some(format!("uid-{name}"));
    route.metadata.generation = Some(1);
    route.metadata.resource_version = Some("1".to_string());
    route
}

pub fn domain(name: &str, domain_name: &str) -> TrellisDomain {
    let mut domain = TrellisDomain::new(
        name,
        TrellisDomainSpec {
            name: domain_name.to_string(),
        },
    );
    domain.metadata.namespace = Some(NAMESPACE.to_string());
    domain
}

pub fn app(name: &str, current_droplet: Option<&str>) -> TrellisApp {
    let mut app = TrellisApp::new(name, TrellisAppSpec::default());
    app.metadata.namespace = Some(NAMESPACE.to_string());
    app.spec.current_droplet_ref.name = current_droplet.unwrap_or_default().to_string();
    app
}

/// A build for `app`; `ports: None` means staging has not finished
pub fn build(name: &str, app: &str, ports: Option<Vec<i32>>) -> TrellisBuild {
    let mut build = TrellisBuild::new(
        name,
        TrellisBuildSpec {
            app_ref: AppRef {
                name: app.to_string(),
            },
        },
    );
    build.metadata.namespace = Some(NAMESPACE.to_string());
    build.status = Some(TrellisBuildStatus {
        droplet: ports.map(|ports| BuildDropletStatus {
            process_types: vec!["web".to_string()],
            ports,
        }),
    });
    build
}

// =============================================================================
// In-memory cluster
// =============================================================================

type Key = (String, String);

fn key_of<K: ResourceExt>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[derive(Default)]
pub struct ClusterState {
    pub domains: BTreeMap<Key, TrellisDomain>,
    pub apps: BTreeMap<Key, TrellisApp>,
    pub builds: BTreeMap<Key, TrellisBuild>,
    pub routes: BTreeMap<Key, TrellisRoute>,
    pub services: BTreeMap<Key, Service>,
    pub proxies: BTreeMap<Key, HTTPProxy>,
    pub fail_apply_service: bool,
    pub fail_list_services: bool,
    /// Number of upcoming proxy updates to reject as stale
    pub stale_proxy_updates: usize,
    version: u64,
}

impl ClusterState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        format!("{}", 1000 + self.version)
    }
}

/// In-memory stand-in for the API server
#[derive(Default)]
pub struct FakeCluster {
    pub state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_domain(&self, domain: TrellisDomain) {
        self.state.lock().domains.insert(key_of(&domain), domain);
    }

    pub fn add_app(&self, app: TrellisApp) {
        self.state.lock().apps.insert(key_of(&app), app);
    }

    pub fn add_build(&self, build: TrellisBuild) {
        self.state.lock().builds.insert(key_of(&build), build);
    }

    pub fn add_route(&self, route: TrellisRoute) {
        self.state.lock().routes.insert(key_of(&route), route);
    }

    pub fn add_proxy(&self, mut proxy: HTTPProxy) {
        let mut state = self.state.lock();
        proxy.metadata.resource_version = Some(state.next_version());
        state.proxies.insert(key_of(&proxy), proxy);
    }

    pub fn route(&self, name: &str) -> Option<TrellisRoute> {
        self.state
            .lock()
            .routes
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    /// Replace a stored route's spec, bumping its generation
    pub fn edit_route(&self, name: &str, edit: impl FnOnce(&mut TrellisRoute)) {
        let mut state = self.state.lock();
        let version = state.next_version();
        if let Some(route) = state
            .routes
            .get_mut(&(NAMESPACE.to_string(), name.to_string()))
        {
            edit(route);
            route.metadata.generation = Some(route.metadata.generation.unwrap_or(0) + 1);
            route.metadata.resource_version = Some(version);
        }
    }

    pub fn proxy(&self, name: &str) -> Option<HTTPProxy> {
        self.state
            .lock()
            .proxies
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    pub fn include_names(&self, fqdn: &str) -> Vec<String> {
        self.proxy(fqdn)
            .map(|p| p.spec.includes.into_iter().map(|i| i.name).collect())
            .unwrap_or_default()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.state
            .lock()
            .services
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn list_in<T: Clone>(map: &BTreeMap<Key, T>, namespace: &str) -> Vec<T> {
        map.iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

fn conflict(kind: &str, key: &Key) -> Error {
    Error::conflict(kind, format!("{}/{}", key.0, key.1))
}

#[async_trait]
impl RouteKubeClient for FakeCluster {
    async fn get_domain(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TrellisDomain>, Error> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.state.lock().domains.get(&key).cloned())
    }

    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<TrellisApp>, Error> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.state.lock().apps.get(&key).cloned())
    }

    async fn get_build(&self, namespace: &str, name: &str) -> Result<Option<TrellisBuild>, Error> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.state.lock().builds.get(&key).cloned())
    }

    async fn list_routes(&self, namespace: &str) -> Result<Vec<TrellisRoute>, Error> {
        Ok(Self::list_in(&self.state.lock().routes, namespace))
    }

    async fn apply_service(&self, service: &Service) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.fail_apply_service {
            return Err(Error::internal("service apply rejected"));
        }
        state.services.insert(key_of(service), service.clone());
        Ok(())
    }

    async fn list_route_services(
        &self,
        namespace: &str,
        route: &str,
    ) -> Result<Vec<Service>, Error> {
        let state = self.state.lock();
        if state.fail_list_services {
            return Err(Error::internal("list services failed"));
        }
        Ok(Self::list_in(&state.services, namespace)
            .into_iter()
            .filter(|s| s.labels().get(ROUTE_GUID_LABEL).map(String::as_str) == Some(route))
            .collect())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let key = (namespace.to_string(), name.to_string());
        self.state.lock().services.remove(&key);
        Ok(())
    }

    async fn apply_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error> {
        let mut state = self.state.lock();
        let mut proxy = proxy.clone();
        proxy.metadata.resource_version = Some(state.next_version());
        state.proxies.insert(key_of(&proxy), proxy);
        Ok(())
    }

    async fn delete_http_proxy(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let key = (namespace.to_string(), name.to_string());
        self.state.lock().proxies.remove(&key);
        Ok(())
    }

    async fn delete_http_proxy_if_unchanged(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<(), Error> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock();
        match state.proxies.get(&key) {
            Some(p) if p.metadata.resource_version.as_deref() != Some(resource_version) => {
                Err(conflict("HTTPProxy", &key))
            }
            _ => {
                state.proxies.remove(&key);
                Ok(())
            }
        }
    }

    async fn list_http_proxies(&self, namespace: &str) -> Result<Vec<HTTPProxy>, Error> {
        Ok(Self::list_in(&self.state.lock().proxies, namespace))
    }

    async fn list_all_http_proxies(&self) -> Result<Vec<HTTPProxy>, Error> {
        Ok(self.state.lock().proxies.values().cloned().collect())
    }

    async fn create_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error> {
        let key = key_of(proxy);
        let mut state = self.state.lock();
        if state.proxies.contains_key(&key) {
            return Err(conflict("HTTPProxy", &key));
        }
        let mut proxy = proxy.clone();
        proxy.metadata.resource_version = Some(state.next_version());
        state.proxies.insert(key, proxy);
        Ok(())
    }

    async fn update_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error> {
        let key = key_of(proxy);
        let mut state = self.state.lock();
        if state.stale_proxy_updates > 0 {
            state.stale_proxy_updates -= 1;
            return Err(conflict("HTTPProxy", &key));
        }
        let version = state.next_version();
        let Some(stored) = state.proxies.get_mut(&key) else {
            return Err(Error::internal(format!("HTTPProxy {}/{} not found", key.0, key.1)));
        };
        if stored.metadata.resource_version != proxy.metadata.resource_version {
            return Err(conflict("HTTPProxy", &key));
        }
        let mut json = serde_json::to_value(&*stored)?;
        merge_apply(&mut json, &fqdn_proxy_patch(proxy));
        let mut updated: HTTPProxy = serde_json::from_value(json)?;
        updated.metadata.resource_version = Some(version);
        *stored = updated;
        Ok(())
    }
}

/// Applies engine patches to stored routes the way the API server would
#[async_trait]
impl ObjectStore<TrellisRoute> for FakeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<TrellisRoute>, Error> {
        let key = (key.namespace.clone(), key.name.clone());
        Ok(self.state.lock().routes.get(&key).cloned())
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &StatusPatch,
        resource_version: Option<&str>,
    ) -> Result<(), Error> {
        let key = (key.namespace.clone(), key.name.clone());
        let mut state = self.state.lock();
        let version = state.next_version();
        let Some(current) = state.routes.get(&key) else {
            return Err(Error::internal("route not found"));
        };
        if resource_version.is_some() && current.metadata.resource_version.as_deref() != resource_version {
            return Err(conflict("TrellisRoute", &key));
        }

        let mut json = serde_json::to_value(current)?;
        merge_apply(&mut json, &patch.body);
        let mut updated: TrellisRoute = serde_json::from_value(json)?;
        updated.metadata.resource_version = Some(version);

        let finalized = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().map_or(true, Vec::is_empty);
        if finalized {
            state.routes.remove(&key);
        } else {
            state.routes.insert(key, updated);
        }
        Ok(())
    }
}
