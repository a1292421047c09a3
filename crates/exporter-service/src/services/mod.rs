//! Per-service metric handlers.
//!
//! Each watched node service has one handler that owns its instruments and
//! the small amount of state needed across events. All handlers share the
//! [`ServiceMetrics`] contract:
//!
//! - construction (`initialize`) declares every instrument exactly once;
//! - `seed_initial_data` requests a first snapshot after the session opens;
//! - `handle_event` reacts to one daemon event, ignoring unknown commands;
//! - `on_disconnect` clears connection-scoped instruments;
//! - `on_reconnect` seeds again.
//!
//! Handlers never return errors. Decode failures and failed requests are
//! logged where they happen and the event is dropped.

pub mod crawler;
pub mod farmer;
pub mod full_node;
pub mod harvester;
pub mod timelord;
pub mod wallet;

pub use crawler::CrawlerMetrics;
pub use farmer::FarmerMetrics;
pub use full_node::FullNodeMetrics;
pub use harvester::HarvesterMetrics;
pub use timelord::TimelordMetrics;
pub use wallet::WalletMetrics;

use crate::errors::ExporterError;
use crate::geo::GeoLookup;
use crate::instruments::InstrumentRegistry;
use crate::observability::metrics::{record_event_dropped, REASON_DECODE_FAILURE};
use crate::rpc::{BulkFetcher, RpcRequester};
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{error, warn};

/// Common contract of every service handler.
#[async_trait]
pub trait ServiceMetrics: Send {
    /// Service this handler owns.
    fn service(&self) -> ServiceKind;

    /// Request a first snapshot of the service's state. Best-effort.
    async fn seed_initial_data(&mut self);

    /// React to one event from this service.
    async fn handle_event(&mut self, event: &Event);

    /// Clear every connection-scoped instrument.
    fn on_disconnect(&mut self);

    /// Called once the session is back; re-seeds by default.
    async fn on_reconnect(&mut self) {
        self.seed_initial_data().await;
    }
}

/// Collaborators handed to handlers at construction.
#[derive(Clone)]
pub struct ServiceContext {
    /// Fire-and-forget requests over the daemon session.
    pub requester: Arc<dyn RpcRequester>,
    /// Secondary HTTP channel, absent when its TLS material is unavailable.
    pub bulk: Option<Arc<dyn BulkFetcher>>,
    /// Country lookup, absent when no database is configured.
    pub geo: Option<Arc<dyn GeoLookup>>,
}

impl ServiceContext {
    #[must_use]
    pub fn new(requester: Arc<dyn RpcRequester>) -> Self {
        Self {
            requester,
            bulk: None,
            geo: None,
        }
    }

    #[must_use]
    pub fn with_bulk(mut self, bulk: Arc<dyn BulkFetcher>) -> Self {
        self.bulk = Some(bulk);
        self
    }

    #[must_use]
    pub fn with_geo(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Queue a request to `service`, logging failures.
    pub(crate) fn request(&self, service: ServiceKind, command: &str, data: serde_json::Value) {
        if let Err(e) = self.requester.request(service, command, data) {
            warn!(
                target: "exporter.services",
                service = %service,
                command,
                error = %e,
                "Failed to queue request"
            );
        }
    }
}

/// Build one handler per watched service, declaring all instruments.
///
/// # Errors
///
/// Returns an error if any instrument declaration is rejected.
pub fn initialize_all(
    registry: &InstrumentRegistry,
    ctx: &ServiceContext,
) -> Result<Vec<Box<dyn ServiceMetrics>>, ExporterError> {
    Ok(vec![
        Box::new(FullNodeMetrics::initialize(registry, ctx)?),
        Box::new(WalletMetrics::initialize(registry, ctx)?),
        Box::new(CrawlerMetrics::initialize(registry, ctx)?),
        Box::new(TimelordMetrics::initialize(registry, ctx)?),
        Box::new(HarvesterMetrics::initialize(registry, ctx)?),
        Box::new(FarmerMetrics::initialize(registry, ctx)?),
    ])
}

/// Decode an event payload, logging and counting failures.
pub(crate) fn decode_payload<T: DeserializeOwned>(service: ServiceKind, event: &Event) -> Option<T> {
    match event.decode() {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(
                target: "exporter.services",
                service = %service,
                command = %event.command,
                error = %e,
                "Failed to decode event payload"
            );
            record_event_dropped(service.as_str(), REASON_DECODE_FAILURE);
            None
        }
    }
}

/// Convert a count or amount to a gauge value.
// Precision loss above 2^53 is accepted for exported values
#[allow(clippy::cast_precision_loss)]
pub(crate) fn gauge_value(value: u64) -> f64 {
    value as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support {
    //! Collaborators for handler unit tests.

    use super::*;
    use crate::rpc::types::{
        GetPlotsResponse, IpsAfterTimestampOptions, IpsAfterTimestampResponse,
    };
    use crate::rpc::RpcError;
    use std::sync::Mutex;

    /// Records every queued request.
    #[derive(Default)]
    pub struct RecordingRequester {
        pub calls: Mutex<Vec<(ServiceKind, String, serde_json::Value)>>,
    }

    impl RecordingRequester {
        pub fn commands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, command, _)| command.clone())
                .collect()
        }
    }

    impl RpcRequester for RecordingRequester {
        fn request(
            &self,
            destination: ServiceKind,
            command: &str,
            data: serde_json::Value,
        ) -> Result<(), RpcError> {
            self.calls
                .lock()
                .unwrap()
                .push((destination, command.to_string(), data));
            Ok(())
        }
    }

    /// Serves fixed responses and records filters.
    #[derive(Default)]
    pub struct StaticBulk {
        pub ips: Vec<String>,
        pub plots: GetPlotsResponse,
        pub fail: bool,
        pub ip_requests: Mutex<Vec<IpsAfterTimestampOptions>>,
        pub plot_requests: Mutex<usize>,
    }

    #[async_trait]
    impl BulkFetcher for StaticBulk {
        async fn get_ips_after_timestamp(
            &self,
            options: &IpsAfterTimestampOptions,
        ) -> Result<IpsAfterTimestampResponse, RpcError> {
            self.ip_requests.lock().unwrap().push(options.clone());
            if self.fail {
                return Err(RpcError::Transport("connection refused".to_string()));
            }
            Ok(IpsAfterTimestampResponse {
                ips: self.ips.clone(),
                total: self.ips.len() as u64,
            })
        }

        async fn get_plots(&self) -> Result<GetPlotsResponse, RpcError> {
            *self.plot_requests.lock().unwrap() += 1;
            if self.fail {
                return Err(RpcError::Timeout(std::time::Duration::from_secs(30)));
            }
            Ok(self.plots.clone())
        }
    }

    pub fn context(requester: &Arc<RecordingRequester>) -> ServiceContext {
        ServiceContext::new(Arc::clone(requester) as Arc<dyn RpcRequester>)
    }

    pub fn event(origin: &str, command: &str, data: serde_json::Value) -> Event {
        Event::new(origin, command, data.to_string())
    }
}
