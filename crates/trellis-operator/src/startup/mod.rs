//! Startup utilities for the Trellis operator

mod crds;

pub use crds::{all_crds, ensure_crds_installed};
