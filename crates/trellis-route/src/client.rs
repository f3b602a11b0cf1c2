//! Kubernetes access for the route controller
//!
//! Everything the reconciler reads or writes goes through [`RouteKubeClient`]
//! so reconcile logic can be exercised against mocks and in-memory fakes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Client, ResourceExt};
use tracing::debug;
use trellis_common::crd::{HTTPProxy, TrellisApp, TrellisBuild, TrellisDomain, TrellisRoute};
use trellis_common::kube_utils::{conflict_on_409, display_key, ignore_not_found};
use trellis_common::{Error, FIELD_MANAGER, ROUTE_GUID_LABEL};

#[cfg(test)]
use mockall::automock;

/// Trait abstracting the Kubernetes operations of the route controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RouteKubeClient: Send + Sync {
    /// Get a TrellisDomain
    async fn get_domain(&self, namespace: &str, name: &str)
        -> Result<Option<TrellisDomain>, Error>;

    /// Get a TrellisApp
    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<TrellisApp>, Error>;

    /// Get a TrellisBuild
    async fn get_build(&self, namespace: &str, name: &str) -> Result<Option<TrellisBuild>, Error>;

    /// List TrellisRoutes in a namespace
    async fn list_routes(&self, namespace: &str) -> Result<Vec<TrellisRoute>, Error>;

    /// Create or patch a backend Service (server-side apply)
    async fn apply_service(&self, service: &Service) -> Result<(), Error>;

    /// List Services labelled as belonging to `route`
    async fn list_route_services(&self, namespace: &str, route: &str)
        -> Result<Vec<Service>, Error>;

    /// Delete a Service; a missing Service is success
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create or patch a child HTTPProxy (server-side apply)
    async fn apply_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error>;

    /// Delete an HTTPProxy; a missing proxy is success
    async fn delete_http_proxy(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Delete an HTTPProxy only if it is still at `resource_version`
    async fn delete_http_proxy_if_unchanged(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<(), Error>;

    /// List HTTPProxies in a namespace
    async fn list_http_proxies(&self, namespace: &str) -> Result<Vec<HTTPProxy>, Error>;

    /// List HTTPProxies across all namespaces
    async fn list_all_http_proxies(&self) -> Result<Vec<HTTPProxy>, Error>;

    /// Create an HTTPProxy; an existing one is reported as a conflict
    async fn create_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error>;

    /// Write the virtual host and includes of an FQDN proxy, guarded by
    /// `proxy.metadata.resourceVersion`
    async fn update_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error>;
}

/// Merge patch writing an FQDN proxy's virtual host and includes.
///
/// Unset fields are sent as `null` so the server drops them instead of
/// keeping the stored value, and `resourceVersion` makes the write conditional.
pub fn fqdn_proxy_patch(proxy: &HTTPProxy) -> serde_json::Value {
    let virtualhost = proxy.spec.virtualhost.as_ref().map(|vh| {
        serde_json::json!({
            "fqdn": vh.fqdn,
            "tls": vh.tls,
        })
    });
    serde_json::json!({
        "metadata": { "resourceVersion": proxy.metadata.resource_version },
        "spec": {
            "virtualhost": virtualhost,
            "includes": proxy.spec.includes,
        },
    })
}

/// Real implementation of RouteKubeClient using kube-rs
pub struct RouteKubeClientImpl {
    client: Client,
}

impl RouteKubeClientImpl {
    /// Create a new RouteKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }
}

#[async_trait]
impl RouteKubeClient for RouteKubeClientImpl {
    async fn get_domain(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TrellisDomain>, Error> {
        let api: Api<TrellisDomain> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<TrellisApp>, Error> {
        let api: Api<TrellisApp> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_build(&self, namespace: &str, name: &str) -> Result<Option<TrellisBuild>, Error> {
        let api: Api<TrellisBuild> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_routes(&self, namespace: &str) -> Result<Vec<TrellisRoute>, Error> {
        let api: Api<TrellisRoute> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn apply_service(&self, service: &Service) -> Result<(), Error> {
        let namespace = service
            .namespace()
            .ok_or_else(|| Error::validation("service has no namespace"))?;
        let name = service.name_any();
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&name, &Self::apply_params(), &Patch::Apply(service))
            .await?;
        debug!(service = %display_key(&namespace, &name), "applied backend service");
        Ok(())
    }

    async fn list_route_services(
        &self,
        namespace: &str,
        route: &str,
    ) -> Result<Vec<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{ROUTE_GUID_LABEL}={route}"));
        Ok(api.list(&params).await?.items)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)?;
        Ok(())
    }

    async fn apply_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error> {
        let namespace = proxy
            .namespace()
            .ok_or_else(|| Error::validation("HTTPProxy has no namespace"))?;
        let api: Api<HTTPProxy> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&proxy.name_any(), &Self::apply_params(), &Patch::Apply(proxy))
            .await?;
        Ok(())
    }

    async fn delete_http_proxy(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<HTTPProxy> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)?;
        Ok(())
    }

    async fn delete_http_proxy_if_unchanged(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<(), Error> {
        let api: Api<HTTPProxy> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: Some(resource_version.to_string()),
                uid: None,
            }),
            ..Default::default()
        };
        ignore_not_found(api.delete(name, &params).await)
            .map_err(|e| match e {
                Error::Kube { source } => {
                    conflict_on_409(source, "HTTPProxy", &display_key(namespace, name))
                }
                other => other,
            })?;
        Ok(())
    }

    async fn list_http_proxies(&self, namespace: &str) -> Result<Vec<HTTPProxy>, Error> {
        let api: Api<HTTPProxy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_all_http_proxies(&self) -> Result<Vec<HTTPProxy>, Error> {
        let api: Api<HTTPProxy> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error> {
        let namespace = proxy
            .namespace()
            .ok_or_else(|| Error::validation("HTTPProxy has no namespace"))?;
        let api: Api<HTTPProxy> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), proxy)
            .await
            .map_err(|e| conflict_on_409(e, "HTTPProxy", &display_key(&namespace, &proxy.name_any())))?;
        Ok(())
    }

    async fn update_http_proxy(&self, proxy: &HTTPProxy) -> Result<(), Error> {
        let namespace = proxy
            .namespace()
            .ok_or_else(|| Error::validation("HTTPProxy has no namespace"))?;
        let name = proxy.name_any();
        let api: Api<HTTPProxy> = Api::namespaced(self.client.clone(), &namespace);
        let body = fqdn_proxy_patch(proxy);
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&body))
            .await
            .map_err(|e| conflict_on_409(e, "HTTPProxy", &display_key(&namespace, &name)))?;
        Ok(())
    }
}
