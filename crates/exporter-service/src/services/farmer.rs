//! Farmer metrics: pool partials per launcher.

use super::{decode_payload, gauge_value, ServiceContext, ServiceMetrics};
use crate::errors::ExporterError;
use crate::instruments::{CounterSet, GaugeSet, InstrumentRegistry};
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const SERVICE: ServiceKind = ServiceKind::Farmer;

#[derive(Debug, Deserialize)]
struct SubmittedPartialEvent {
    launcher_id: String,
    #[serde(default)]
    current_difficulty: u64,
    #[serde(default)]
    points_acknowledged_since_start: u64,
}

/// Farmer handler.
pub struct FarmerMetrics {
    submitted_partials: CounterSet,
    current_difficulty: GaugeSet,
    points_acknowledged_since_start: GaugeSet,
}

impl FarmerMetrics {
    pub fn initialize(
        registry: &InstrumentRegistry,
        _ctx: &ServiceContext,
    ) -> Result<Self, ExporterError> {
        let labels = ["launcher_id"];
        Ok(Self {
            submitted_partials: registry.counter_set(
                SERVICE,
                "submitted_partials",
                "Number of partials submitted since the exporter started",
                &labels,
            )?,
            current_difficulty: registry.gauge_set(
                SERVICE,
                "current_difficulty",
                "Current pool difficulty for this launcher id",
                &labels,
            )?,
            points_acknowledged_since_start: registry.gauge_set(
                SERVICE,
                "points_acknowledged_since_start",
                "Points acknowledged by the pool since the farmer started, not since the exporter started",
                &labels,
            )?,
        })
    }

    fn submitted_partial(&self, event: &Event) {
        let Some(partial) = decode_payload::<SubmittedPartialEvent>(SERVICE, event) else {
            return;
        };
        let labels = [partial.launcher_id.as_str()];

        self.submitted_partials.increment(&labels, 1.0);
        self.current_difficulty
            .set(&labels, gauge_value(partial.current_difficulty));
        self.points_acknowledged_since_start
            .set(&labels, gauge_value(partial.points_acknowledged_since_start));
    }
}

#[async_trait]
impl ServiceMetrics for FarmerMetrics {
    fn service(&self) -> ServiceKind {
        SERVICE
    }

    async fn seed_initial_data(&mut self) {}

    async fn handle_event(&mut self, event: &Event) {
        match event.command.as_str() {
            "submitted_partial" => self.submitted_partial(event),
            "proof" => debug!(
                target: "exporter.farmer",
                data = %String::from_utf8_lossy(&event.data),
                "Proof found"
            ),
            other => debug!(target: "exporter.farmer", command = other, "Ignoring command"),
        }
    }

    fn on_disconnect(&mut self) {
        self.current_difficulty.reset();
        self.points_acknowledged_since_start.reset();
    }
}
