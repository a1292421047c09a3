//! Observability: HTTP surface and exporter self-metrics.

pub mod health;
pub mod metrics;

pub use health::{exporter_router, ExportState, HealthState};
