//! Route aggregation controller for Trellis
//!
//! Reconciles `TrellisRoute` objects into:
//! - one backend `Service` per effective destination
//! - one child `HTTPProxy` per route holding its path rule
//! - one shared FQDN `HTTPProxy` per hostname whose `includes` list every
//!   live route on that hostname

pub mod client;
pub mod config;
pub mod controller;
pub mod destinations;
pub mod index;
pub mod proxy;

#[cfg(test)]
mod testing;

pub use client::{RouteKubeClient, RouteKubeClientImpl};
pub use config::{EmptyParentPolicy, RouteConfig};
pub use controller::RouteReconciler;
