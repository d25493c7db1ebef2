//! # Vigil Core — Shared foundation for the threat-intelligence alerting pipeline
//!
//! Every Vigil crate links against this library. It carries:
//! - The data model: classified threat events, tenant monitoring profiles,
//!   intelligence alerts, escalation records, tenant learning profiles.
//! - Geospatial primitives: haversine distance, point-in-polygon,
//!   polygon intersection, centroids.
//! - The error taxonomy (`VigilError`) and TOML configuration loading.

pub mod config;
pub mod error;
pub mod geo;
pub mod types;

pub use error::{VigilError, VigilResult};
