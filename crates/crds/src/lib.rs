//! Grafana Dashboard Controller CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the dashboard controller.

pub mod grafana_dashboard;

pub use grafana_dashboard::*;
