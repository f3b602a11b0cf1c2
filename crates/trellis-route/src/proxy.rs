//! HTTPProxy construction and FQDN include folding

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use trellis_common::crd::{
    Destination, HTTPProxy, HTTPProxySpec, ProxyInclude, ProxyMatchCondition, ProxyRoute,
    ProxyService, ProxyTls, TrellisRoute, VirtualHost,
};
use trellis_common::{Error, ROUTE_GUID_LABEL};

use crate::destinations::service_name;

/// Lower-cased hostname for `host` under `domain`
pub fn fqdn(host: &str, domain: &str) -> String {
    format!("{host}.{domain}").to_lowercase()
}

/// Public URI of a route
pub fn uri(fqdn: &str, path: &str) -> String {
    format!("{fqdn}{path}")
}

/// Child proxy carrying the route's path rule, controller-owned by the route
pub fn build_route_proxy(
    route: &TrellisRoute,
    effective: &[Destination],
) -> Result<HTTPProxy, Error> {
    let owner = route.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation_for(route.name_any(), "route has no uid to own its proxy with")
    })?;
    let prefix = if route.spec.path.is_empty() {
        "/".to_string()
    } else {
        route.spec.path.to_lowercase()
    };

    let services = effective
        .iter()
        .filter_map(|d| {
            d.port.map(|port| ProxyService {
                name: service_name(d),
                port,
            })
        })
        .collect();

    Ok(HTTPProxy {
        metadata: ObjectMeta {
            name: Some(route.name_any()),
            namespace: route.namespace(),
            labels: Some(BTreeMap::from([(
                ROUTE_GUID_LABEL.to_string(),
                route.name_any(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: HTTPProxySpec {
            virtualhost: None,
            includes: Vec::new(),
            routes: vec![ProxyRoute {
                conditions: vec![ProxyMatchCondition {
                    prefix: Some(prefix),
                }],
                services,
                enable_websockets: true,
            }],
        },
    })
}

/// Virtual host for an FQDN proxy
pub fn virtual_host(fqdn: &str, tls_secret: Option<&str>) -> VirtualHost {
    VirtualHost {
        fqdn: fqdn.to_string(),
        tls: tls_secret.map(|secret| ProxyTls {
            secret_name: secret.to_string(),
        }),
    }
}

/// New FQDN proxy named after the hostname
pub fn build_fqdn_proxy(
    namespace: &str,
    fqdn: &str,
    tls_secret: Option<&str>,
    includes: Vec<ProxyInclude>,
) -> HTTPProxy {
    HTTPProxy {
        metadata: ObjectMeta {
            name: Some(fqdn.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: HTTPProxySpec {
            virtualhost: Some(virtual_host(fqdn, tls_secret)),
            includes,
            routes: Vec::new(),
        },
    }
}

/// Include entry pointing at a route's child proxy
pub fn include_for(namespace: &str, name: &str) -> ProxyInclude {
    ProxyInclude {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

/// Recompute an FQDN proxy's includes around `route_name`.
///
/// Existing entries are kept in order when they name a route in `live`
/// (non-deleting routes of `namespace` whose spec resolves to the proxy's
/// FQDN); duplicates and entries for other namespaces are dropped. The route
/// itself is appended if missing.
pub fn fold_includes(
    existing: &[ProxyInclude],
    namespace: &str,
    route_name: &str,
    live: &HashSet<String>,
) -> Vec<ProxyInclude> {
    let mut folded: Vec<ProxyInclude> = Vec::with_capacity(existing.len() + 1);
    for include in existing {
        let keep = include.namespace == namespace
            && (include.name == route_name || live.contains(&include.name));
        if keep && !folded.contains(include) {
            folded.push(include.clone());
        }
    }

    let own = include_for(namespace, route_name);
    if !folded.contains(&own) {
        folded.push(own);
    }
    folded
}

/// Includes with every entry for `name` in `namespace` removed
pub fn without_include(existing: &[ProxyInclude], namespace: &str, name: &str) -> Vec<ProxyInclude> {
    existing
        .iter()
        .filter(|i| !(i.name == name && i.namespace == namespace))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{destination, route};

    fn live(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_fqdn_is_lower_cased() {
        assert_eq!(fqdn("My-App", "ex.com"), "my-app.ex.com");
        assert_eq!(fqdn("api", "Apps.Example.COM"), "api.apps.example.com");
        assert_eq!(uri("my-app.ex.com", "/v1"), "my-app.ex.com/v1");
    }

    #[test]
    fn test_route_proxy_rule() {
        let route = route("route-1", "my-app", "", vec![]);
        let effective = vec![
            destination("dest-1", "app-1", Some(80)),
            destination("dest-2", "app-2", Some(8080)),
        ];
        let proxy = build_route_proxy(&route, &effective).unwrap();

        assert_eq!(proxy.name_any(), "route-1");
        assert!(proxy.spec.virtualhost.is_none());
        let rule = &proxy.spec.routes[0];
        assert_eq!(rule.conditions[0].prefix.as_deref(), Some("/"));
        assert!(rule.enable_websockets);
        assert_eq!(
            rule.services,
            vec![
                ProxyService {
                    name: "s-dest-1".to_string(),
                    port: 80
                },
                ProxyService {
                    name: "s-dest-2".to_string(),
                    port: 8080
                },
            ]
        );
        assert_eq!(
            proxy.metadata.owner_references.unwrap()[0].name,
            "route-1"
        );
    }

    #[test]
    fn test_route_proxy_prefix_is_lower_cased() {
        let route = route("route-1", "my-app", "/Api/V1", vec![]);
        let proxy = build_route_proxy(&route, &[]).unwrap();
        assert_eq!(
            proxy.spec.routes[0].conditions[0].prefix.as_deref(),
            Some("/api/v1")
        );
        assert_eq!(uri("my-app.ex.com", &route.spec.path), "my-app.ex.com/Api/V1");
    }

    #[test]
    fn test_fqdn_proxy_carries_tls() {
        let proxy = build_fqdn_proxy(
            "space-1",
            "my-app.ex.com",
            Some("system/wildcard"),
            vec![include_for("space-1", "route-1")],
        );
        assert_eq!(proxy.name_any(), "my-app.ex.com");
        assert_eq!(proxy.fqdn(), Some("my-app.ex.com"));
        assert_eq!(
            proxy.spec.virtualhost.unwrap().tls.unwrap().secret_name,
            "system/wildcard"
        );
    }

    /// Story: a second route on the same host is appended after the first
    #[test]
    fn story_fold_appends_new_route_preserving_order() {
        let existing = vec![include_for("space-1", "route-1")];
        let live = live(&["route-1", "route-2"]);
        let folded = fold_includes(&existing, "space-1", "route-2", &live);
        assert_eq!(
            folded,
            vec![include_for("space-1", "route-1"), include_for("space-1", "route-2")]
        );

        // Folding again is stable
        let again = fold_includes(&folded, "space-1", "route-2", &live);
        assert_eq!(again, folded);
    }

    /// Story: entries for deleted, deleting, or re-hosted routes are pruned
    /// along with duplicates and foreign-namespace entries
    #[test]
    fn story_fold_prunes_stale_entries() {
        let existing = vec![
            include_for("space-1", "gone"),
            include_for("space-1", "moved"),
            include_for("space-2", "route-2"),
            include_for("space-1", "route-2"),
            include_for("space-1", "route-1"),
            include_for("space-1", "route-1"),
        ];
        let folded = fold_includes(&existing, "space-1", "route-1", &live(&["route-2"]));
        assert_eq!(
            folded,
            vec![include_for("space-1", "route-2"), include_for("space-1", "route-1")]
        );
    }

    #[test]
    fn test_without_include() {
        let existing = vec![include_for("space-1", "route-1"), include_for("space-1", "route-2")];
        assert_eq!(
            without_include(&existing, "space-1", "route-1"),
            vec![include_for("space-1", "route-2")]
        );
        assert_eq!(without_include(&existing, "space-2", "route-1"), existing);
    }
}
