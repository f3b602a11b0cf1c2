//! TrellisRoute reconciler
//!
//! Each pass recomputes everything from the route's spec:
//!
//! 1. resolve the domain and the effective destinations
//! 2. apply one backend Service per effective destination
//! 3. apply (or delete) the route's child HTTPProxy
//! 4. fold the route into the shared FQDN HTTPProxy for its hostname
//! 5. publish destinations, FQDN and URI on status
//! 6. sweep Services the route no longer needs
//!
//! The FQDN proxy is shared by every route on a hostname, so writes to it are
//! guarded by the resourceVersion it was read at and conflicts retry the pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};
use trellis_common::crd::{Destination, HTTPProxy, ProxyInclude, TrellisRoute};
use trellis_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use trellis_common::kube_utils::{display_key, remove_finalizer};
use trellis_common::{Error, NotReadyError, ROUTE_FINALIZER};
use trellis_reconcile::{ObjectKey, ObjectReconciler, Requeue};

use crate::client::{RouteKubeClient, RouteKubeClientImpl};
use crate::config::{EmptyParentPolicy, RouteConfig};
use crate::destinations::{build_service, resolve_effective_destinations, service_name};
use crate::proxy;

/// Ready reason when the referenced domain does not exist
pub const INVALID_DOMAIN_REF: &str = "InvalidDomainRef";
/// Ready reason when the domain lookup fails
pub const FETCH_DOMAIN_REF: &str = "FetchDomainRef";
/// Ready reason when destination ports cannot be resolved
pub const BUILD_EFFECTIVE_DESTINATIONS: &str = "BuildEffectiveDestinations";
/// Ready reason when a backend Service cannot be applied
pub const CREATE_PATCH_SERVICES: &str = "CreatePatchServices";
/// Ready reason when the child proxy cannot be written
pub const RECONCILE_ROUTE_PROXY: &str = "ReconcileRouteProxy";
/// Ready reason when the FQDN proxy cannot be written
pub const RECONCILE_FQDN_PROXY: &str = "ReconcileFQDNProxy";

/// Reconciles TrellisRoutes into Services and HTTPProxies
pub struct RouteReconciler {
    kube: Arc<dyn RouteKubeClient>,
    events: Arc<dyn EventPublisher>,
    config: RouteConfig,
}

impl RouteReconciler {
    /// Create a reconciler talking to the cluster through `client`
    pub fn new(client: kube::Client, config: RouteConfig) -> Self {
        Self {
            kube: Arc::new(RouteKubeClientImpl::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, "trellis-route-controller")),
            config,
        }
    }

    /// Create a reconciler with injected dependencies
    pub fn with_parts(
        kube: Arc<dyn RouteKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: RouteConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
        }
    }

    fn tls_secret(&self) -> Option<&str> {
        self.config.workloads_tls_secret.as_deref()
    }

    /// Deletion path: leave every parent, then drop the legacy finalizer
    async fn finalize(&self, route: &mut TrellisRoute, namespace: &str) -> Result<(), Error> {
        let name = route.name_any();
        let proxies = self.kube.list_http_proxies(namespace).await?;
        self.remove_from_parents(&proxies, namespace, &name, None)
            .await?;

        if remove_finalizer(&mut route.metadata, ROUTE_FINALIZER) {
            debug!(route = %name, "removed legacy route finalizer");
        }
        Ok(())
    }

    async fn reconcile_services(
        &self,
        route: &TrellisRoute,
        effective: &[Destination],
    ) -> Result<(), Error> {
        for destination in effective {
            let service = build_service(route, destination)?;
            self.kube.apply_service(&service).await?;
        }
        Ok(())
    }

    async fn reconcile_route_proxy(
        &self,
        route: &TrellisRoute,
        namespace: &str,
        effective: &[Destination],
    ) -> Result<(), Error> {
        if effective.is_empty() {
            debug!(route = %route.name_any(), "no effective destinations, removing route proxy");
            return self.kube.delete_http_proxy(namespace, &route.name_any()).await;
        }
        let child = proxy::build_route_proxy(route, effective)?;
        self.kube.apply_http_proxy(&child).await
    }

    /// Make the FQDN proxy for `fqdn` include this route, creating it if needed
    async fn reconcile_fqdn_proxy(
        &self,
        route: &TrellisRoute,
        namespace: &str,
        fqdn: &str,
        domain_name: &str,
    ) -> Result<(), Error> {
        let name = route.name_any();
        let proxies = self.kube.list_all_http_proxies().await?;

        let (local, foreign): (Vec<&HTTPProxy>, Vec<&HTTPProxy>) = proxies
            .iter()
            .filter(|p| p.fqdn() == Some(fqdn))
            .partition(|p| p.namespace().as_deref() == Some(namespace));

        if let Some(owner) = foreign.first() {
            let message = format!(
                "FQDN {fqdn} is already claimed by namespace {}",
                owner.namespace().unwrap_or_default()
            );
            self.warn(route, reasons::FQDN_IN_USE, &message).await;
            return Err(NotReadyError::new()
                .with_reason(reasons::FQDN_IN_USE)
                .with_message(message)
                .into());
        }
        if local.len() > 1 {
            let names: Vec<String> = local.iter().map(|p| p.name_any()).collect();
            let message = format!("FQDN {fqdn} is claimed by {}", names.join(", "));
            self.warn(route, reasons::DUPLICATE_FQDN_PROXY, &message)
                .await;
            return Err(NotReadyError::new()
                .with_reason(reasons::DUPLICATE_FQDN_PROXY)
                .with_message(message)
                .into());
        }

        self.remove_from_parents(&proxies, namespace, &name, Some(fqdn))
            .await?;

        let Some(parent) = local.first() else {
            let squatter = proxies
                .iter()
                .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == fqdn);
            if let Some(squatter) = squatter {
                let message = format!(
                    "HTTPProxy {} already exists and does not serve FQDN {fqdn}",
                    display_key(namespace, &squatter.name_any())
                );
                self.warn(route, reasons::DUPLICATE_FQDN_PROXY, &message)
                    .await;
                return Err(NotReadyError::new()
                    .with_reason(reasons::DUPLICATE_FQDN_PROXY)
                    .with_message(message)
                    .into());
            }

            info!(route = %name, fqdn, "creating FQDN proxy");
            let parent = proxy::build_fqdn_proxy(
                namespace,
                fqdn,
                self.tls_secret(),
                vec![proxy::include_for(namespace, &name)],
            );
            return self.kube.create_http_proxy(&parent).await;
        };

        let live = self
            .live_routes(namespace, &name, fqdn, route, domain_name)
            .await?;
        let includes = proxy::fold_includes(&parent.spec.includes, namespace, &name, &live);
        let virtualhost = proxy::virtual_host(fqdn, self.tls_secret());

        if includes == parent.spec.includes && parent.spec.virtualhost.as_ref() == Some(&virtualhost)
        {
            return Ok(());
        }

        debug!(
            route = %name,
            fqdn,
            includes = includes.len(),
            "updating FQDN proxy includes"
        );
        let mut updated = (*parent).clone();
        updated.spec.includes = includes;
        updated.spec.virtualhost = Some(virtualhost);
        self.kube.update_http_proxy(&updated).await
    }

    /// Names of the other non-deleting routes in `namespace` whose spec
    /// resolves to `fqdn`
    async fn live_routes(
        &self,
        namespace: &str,
        own_name: &str,
        fqdn: &str,
        own: &TrellisRoute,
        own_domain: &str,
    ) -> Result<HashSet<String>, Error> {
        let mut domains: HashMap<(String, String), Option<String>> = HashMap::new();
        domains.insert(
            (
                own.domain_namespace(namespace).to_string(),
                own.spec.domain_ref.name.clone(),
            ),
            Some(own_domain.to_string()),
        );

        let mut live = HashSet::new();
        for peer in self.kube.list_routes(namespace).await? {
            let peer_name = peer.name_any();
            if peer_name == own_name || peer.is_deleting() {
                continue;
            }

            let domain_key = (
                peer.domain_namespace(namespace).to_string(),
                peer.spec.domain_ref.name.clone(),
            );
            let domain = match domains.get(&domain_key) {
                Some(domain) => domain.clone(),
                None => {
                    let domain = self
                        .kube
                        .get_domain(&domain_key.0, &domain_key.1)
                        .await?
                        .map(|d| d.spec.name);
                    domains.insert(domain_key, domain.clone());
                    domain
                }
            };

            if domain.is_some_and(|d| proxy::fqdn(&peer.spec.host, &d) == fqdn) {
                live.insert(peer_name);
            }
        }
        Ok(live)
    }

    /// Drop this route's include from FQDN proxies in its namespace, except
    /// the one for `keep_fqdn`
    async fn remove_from_parents(
        &self,
        proxies: &[HTTPProxy],
        namespace: &str,
        name: &str,
        keep_fqdn: Option<&str>,
    ) -> Result<(), Error> {
        let stale = proxies.iter().filter(|p| {
            p.namespace().as_deref() == Some(namespace)
                && p.spec.virtualhost.is_some()
                && (keep_fqdn.is_none() || p.fqdn() != keep_fqdn)
                && p.includes_child(namespace, name)
        });

        for parent in stale {
            debug!(
                route = %display_key(namespace, name),
                parent = %parent.name_any(),
                "removing route from FQDN proxy"
            );
            let includes = proxy::without_include(&parent.spec.includes, namespace, name);
            self.write_parent_includes(parent, includes).await?;
        }
        Ok(())
    }

    async fn write_parent_includes(
        &self,
        parent: &HTTPProxy,
        includes: Vec<ProxyInclude>,
    ) -> Result<(), Error> {
        let namespace = parent.namespace().unwrap_or_default();
        let name = parent.name_any();

        if includes.is_empty() && self.config.empty_parent_policy == EmptyParentPolicy::Delete {
            if let Some(version) = parent.resource_version() {
                info!(parent = %display_key(&namespace, &name), "deleting empty FQDN proxy");
                return self
                    .kube
                    .delete_http_proxy_if_unchanged(&namespace, &name, &version)
                    .await;
            }
        }

        let mut updated = parent.clone();
        updated.spec.includes = includes;
        self.kube.update_http_proxy(&updated).await
    }

    /// Delete Services labelled for this route that no effective destination uses
    async fn delete_orphaned_services(
        &self,
        namespace: &str,
        name: &str,
        keep: &HashSet<String>,
    ) -> Result<(), Error> {
        let services = self.kube.list_route_services(namespace, name).await?;
        for service in services {
            let service_name = service.name_any();
            if keep.contains(&service_name) {
                continue;
            }
            debug!(route = %name, service = %service_name, "deleting orphaned service");
            self.kube.delete_service(namespace, &service_name).await?;
        }
        Ok(())
    }

    async fn warn(&self, route: &TrellisRoute, reason: &str, message: &str) {
        self.events
            .publish(
                &route.object_ref(&()),
                EventType::Warning,
                reason,
                actions::RECONCILE,
                Some(message.to_string()),
            )
            .await;
    }
}

/// Wrap `err` as NotReady with `reason`; errors already NotReady pass through
fn not_ready(err: Error, reason: &str, message: &str) -> Error {
    match err {
        Error::NotReady(_) => err,
        other => NotReadyError::new()
            .with_reason(reason)
            .with_message(message)
            .with_cause(other)
            .into(),
    }
}

#[async_trait]
impl ObjectReconciler<TrellisRoute> for RouteReconciler {
    #[instrument(skip(self, route), fields(route = %route.name_any()))]
    async fn reconcile_resource(&self, route: &mut TrellisRoute) -> Result<Requeue, Error> {
        let name = route.name_any();
        let namespace = route
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "route must be namespaced"))?;

        route.status_mut().observed_generation = route.metadata.generation;

        if route.is_deleting() {
            info!("route is being deleted");
            self.finalize(route, &namespace).await?;
            return Ok(Requeue::Never);
        }

        let domain_namespace = route.domain_namespace(&namespace).to_string();
        let domain_ref = route.spec.domain_ref.name.clone();
        let domain = match self.kube.get_domain(&domain_namespace, &domain_ref).await {
            Ok(Some(domain)) => domain,
            Ok(None) => {
                return Err(NotReadyError::new()
                    .with_reason(INVALID_DOMAIN_REF)
                    .with_message(format!(
                        "domain {} does not exist",
                        display_key(&domain_namespace, &domain_ref)
                    ))
                    .with_requeue_after(self.config.domain_retry)
                    .into());
            }
            Err(e) => return Err(not_ready(e, FETCH_DOMAIN_REF, "failed to fetch domain")),
        };

        let effective =
            resolve_effective_destinations(self.kube.as_ref(), &namespace, &route.spec.destinations)
                .await
                .map_err(|e| {
                    not_ready(
                        e,
                        BUILD_EFFECTIVE_DESTINATIONS,
                        "failed to resolve destination ports",
                    )
                })?;

        self.reconcile_services(route, &effective)
            .await
            .map_err(|e| not_ready(e, CREATE_PATCH_SERVICES, "failed to apply services"))?;

        let fqdn = proxy::fqdn(&route.spec.host, &domain.spec.name);
        let uri = proxy::uri(&fqdn, &route.spec.path);

        self.reconcile_route_proxy(route, &namespace, &effective)
            .await
            .map_err(|e| not_ready(e, RECONCILE_ROUTE_PROXY, "failed to write route proxy"))?;

        self.reconcile_fqdn_proxy(route, &namespace, &fqdn, &domain.spec.name)
            .await
            .map_err(|e| not_ready(e, RECONCILE_FQDN_PROXY, "failed to write FQDN proxy"))?;

        let keep: HashSet<String> = effective.iter().map(service_name).collect();
        let status = route.status_mut();
        status.destinations = effective;
        status.fqdn = Some(fqdn);
        status.uri = Some(uri);

        if let Err(e) = self.delete_orphaned_services(&namespace, &name, &keep).await {
            warn!(error = %e, "failed to delete orphaned services");
            return Ok(Requeue::After(self.config.orphan_sweep_retry));
        }

        Ok(Requeue::Never)
    }

    async fn reconcile_absent(&self, key: &ObjectKey) -> Result<(), Error> {
        let proxies = self.kube.list_http_proxies(&key.namespace).await?;
        self.remove_from_parents(&proxies, &key.namespace, &key.name, None)
            .await
    }
}
