//! Timelord metrics. The timelord only pushes events; nothing is seeded.

use super::{decode_payload, ServiceContext, ServiceMetrics};
use crate::errors::ExporterError;
use crate::instruments::{CounterSet, InstrumentRegistry, LazyCounter, LazyGauge};
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const SERVICE: ServiceKind = ServiceKind::Timelord;

#[derive(Debug, Deserialize)]
struct FinishedPotEvent {
    estimated_ips: f64,
}

#[derive(Debug, Deserialize)]
struct CompactProofEvent {
    field_vdf: u8,
}

/// Label for a compact proof's VDF field.
fn vdf_field_label(field: u8) -> String {
    match field {
        1 => "cc_eos_vdf".to_string(),
        2 => "icc_eos_vdf".to_string(),
        3 => "cc_sp_vdf".to_string(),
        4 => "cc_ip_vdf".to_string(),
        other => other.to_string(),
    }
}

/// Timelord handler.
pub struct TimelordMetrics {
    fastest_timelord: LazyCounter,
    slow_timelord: LazyCounter,
    estimated_ips: LazyGauge,
    compact_proofs_completed: CounterSet,
}

impl TimelordMetrics {
    pub fn initialize(
        registry: &InstrumentRegistry,
        _ctx: &ServiceContext,
    ) -> Result<Self, ExporterError> {
        Ok(Self {
            fastest_timelord: registry.counter(
                SERVICE,
                "fastest_timelord",
                "Counter of peaks this timelord infused first",
            )?,
            slow_timelord: registry.counter(
                SERVICE,
                "slow_timelord",
                "Counter of peaks another timelord infused first",
            )?,
            estimated_ips: registry.gauge(
                SERVICE,
                "estimated_ips",
                "Estimated VDF iterations per second",
            )?,
            compact_proofs_completed: registry.counter_set(
                SERVICE,
                "compact_proofs_completed",
                "Counter of compact proofs completed since the exporter started, by VDF field",
                &["vdf_field"],
            )?,
        })
    }
}

#[async_trait]
impl ServiceMetrics for TimelordMetrics {
    fn service(&self) -> ServiceKind {
        SERVICE
    }

    async fn seed_initial_data(&mut self) {}

    async fn handle_event(&mut self, event: &Event) {
        match event.command.as_str() {
            "new_peak" => self.fastest_timelord.add(1.0),
            "skipping_peak" => self.slow_timelord.add(1.0),
            "finished_pot" => {
                if let Some(pot) = decode_payload::<FinishedPotEvent>(SERVICE, event) {
                    self.estimated_ips.set(pot.estimated_ips);
                }
            }
            "new_compact_proof" => {
                if let Some(proof) = decode_payload::<CompactProofEvent>(SERVICE, event) {
                    let field = vdf_field_label(proof.field_vdf);
                    self.compact_proofs_completed
                        .increment(&[field.as_str()], 1.0);
                }
            }
            other => debug!(target: "exporter.timelord", command = other, "Ignoring command"),
        }
    }

    fn on_disconnect(&mut self) {
        self.estimated_ips.unregister();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use std::sync::Arc;

    fn setup() -> (InstrumentRegistry, TimelordMetrics) {
        let registry = InstrumentRegistry::new("stai");
        let requester = Arc::new(RecordingRequester::default());
        let handler = TimelordMetrics::initialize(&registry, &context(&requester)).unwrap();
        (registry, handler)
    }

    #[tokio::test]
    async fn test_peak_counters() {
        let (registry, mut handler) = setup();
        for command in ["new_peak", "new_peak", "skipping_peak"] {
            handler
                .handle_event(&event("stai_timelord", command, serde_json::json!({})))
                .await;
        }

        let export = registry.export();
        assert!(export.contains("stai_timelord_fastest_timelord 2"));
        assert!(export.contains("stai_timelord_slow_timelord 1"));
    }

    #[tokio::test]
    async fn test_compact_proofs_by_field() {
        let (registry, mut handler) = setup();
        for field in [1, 4, 4, 9] {
            handler
                .handle_event(&event(
                    "stai_timelord",
                    "new_compact_proof",
                    serde_json::json!({"header_hash": "0x01", "height": 5, "field_vdf": field}),
                ))
                .await;
        }

        let export = registry.export();
        assert!(export.contains("stai_timelord_compact_proofs_completed{vdf_field=\"cc_ip_vdf\"} 2"));
        assert!(export.contains("stai_timelord_compact_proofs_completed{vdf_field=\"cc_eos_vdf\"} 1"));
        assert!(export.contains("stai_timelord_compact_proofs_completed{vdf_field=\"9\"} 1"));
    }

    #[tokio::test]
    async fn test_estimated_ips_cleared_on_disconnect() {
        let (registry, mut handler) = setup();
        handler.seed_initial_data().await;
        handler
            .handle_event(&event(
                "stai_timelord",
                "finished_pot",
                serde_json::json!({"estimated_ips": 180000.5, "iterations_needed": 1000}),
            ))
            .await;
        handler.handle_event(&event("stai_timelord", "new_peak", serde_json::json!({}))).await;
        assert!(registry.export().contains("stai_timelord_estimated_ips 180000.5"));

        handler.on_disconnect();

        let export = registry.export();
        assert!(!export.contains("stai_timelord_estimated_ips"));
        assert!(export.contains("stai_timelord_fastest_timelord 1"));
    }
}
