//! Custom Resource Definitions for Trellis
//!
//! User-authored records live in the `trellis.dev/v1alpha1` group. The
//! routing resources Trellis writes are Contour `HTTPProxy` objects.

mod app;
mod domain;
mod http_proxy;
mod route;
mod types;

pub use app::{
    AppRef, BuildDropletStatus, DropletRef, TrellisApp, TrellisAppSpec, TrellisBuild,
    TrellisBuildSpec, TrellisBuildStatus,
};
pub use domain::{TrellisDomain, TrellisDomainSpec};
pub use http_proxy::{
    HTTPProxy, HTTPProxySpec, ProxyInclude, ProxyMatchCondition, ProxyRoute, ProxyService,
    ProxyTls, VirtualHost,
};
pub use route::{
    Destination, DomainRef, TrellisRoute, TrellisRouteSpec, TrellisRouteStatus,
    DEFAULT_DESTINATION_PROTOCOL,
};
pub use types::{set_condition, Condition, ConditionStatus, HasConditions};
