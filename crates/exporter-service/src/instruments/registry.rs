//! Process-wide instrument registry.
//!
//! One `InstrumentRegistry` is created in `main` and shared by `Arc` with the
//! service handlers (which declare and write instruments) and the HTTP
//! exporter (which only calls [`InstrumentRegistry::export`]). The underlying
//! `prometheus::Registry` guards its collector map with a lock and every
//! value is an atomic, so export can run at any time without observing a
//! torn value. An instrument unregistered mid-export is simply absent from
//! that snapshot.
//!
//! Instruments are named `<namespace>_<service>_<name>`, e.g.
//! `stai_crawler_total_nodes_5_days`.

use super::{CounterSet, GaugeSet, LazyCounter, LazyGauge};
use crate::errors::ExporterError;
use crate::types::ServiceKind;
use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tracing::error;

/// Content type of [`InstrumentRegistry::export`] output.
pub const EXPORT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registry of every node instrument.
pub struct InstrumentRegistry {
    registry: Registry,
    namespace: String,
    declared: Mutex<BTreeSet<String>>,
}

impl InstrumentRegistry {
    /// Create an empty registry whose instruments share `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            registry: Registry::new(),
            namespace: namespace.into(),
            declared: Mutex::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Declare a label-free gauge. It stays invisible until its first `set`.
    pub fn gauge(
        &self,
        service: ServiceKind,
        name: &str,
        help: &str,
    ) -> Result<LazyGauge, ExporterError> {
        let (opts, fq_name) = self.claim(service, name, help)?;
        let gauge = Gauge::with_opts(opts).map_err(|e| invalid(&fq_name, &e))?;
        Ok(LazyGauge::new(gauge, self.registry.clone(), fq_name))
    }

    /// Declare a label-free counter. It stays invisible until its first `add`.
    pub fn counter(
        &self,
        service: ServiceKind,
        name: &str,
        help: &str,
    ) -> Result<LazyCounter, ExporterError> {
        let (opts, fq_name) = self.claim(service, name, help)?;
        let counter = Counter::with_opts(opts).map_err(|e| invalid(&fq_name, &e))?;
        Ok(LazyCounter::new(counter, self.registry.clone(), fq_name))
    }

    /// Declare a gauge indexed by `labels`.
    pub fn gauge_set(
        &self,
        service: ServiceKind,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<GaugeSet, ExporterError> {
        let (opts, fq_name) = self.claim(service, name, help)?;
        let vec = GaugeVec::new(opts, labels).map_err(|e| invalid(&fq_name, &e))?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(|e| invalid(&fq_name, &e))?;
        Ok(GaugeSet::new(vec, fq_name))
    }

    /// Declare a counter indexed by `labels`.
    pub fn counter_set(
        &self,
        service: ServiceKind,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<CounterSet, ExporterError> {
        let (opts, fq_name) = self.claim(service, name, help)?;
        let vec = CounterVec::new(opts, labels).map_err(|e| invalid(&fq_name, &e))?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(|e| invalid(&fq_name, &e))?;
        Ok(CounterSet::new(vec, fq_name))
    }

    /// Render every registered instrument in the Prometheus text format.
    ///
    /// Output is sorted by metric name and label values, so two exports of
    /// the same state are byte-identical.
    #[must_use]
    pub fn export(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
            error!(
                target: "exporter.instruments",
                error = %e,
                "Failed to encode instrument snapshot"
            );
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Reserve the fully-qualified name for a new instrument.
    fn claim(
        &self,
        service: ServiceKind,
        name: &str,
        help: &str,
    ) -> Result<(Opts, String), ExporterError> {
        let opts = Opts::new(name, help)
            .namespace(self.namespace.clone())
            .subsystem(service.as_str());
        let fq_name = opts.fq_name();

        let mut declared = self
            .declared
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !declared.insert(fq_name.clone()) {
            return Err(ExporterError::DuplicateInstrument(fq_name));
        }

        tracing::trace!(
            target: "exporter.instruments",
            instrument = %fq_name,
            "Declared instrument"
        );
        Ok((opts, fq_name))
    }
}

fn invalid(name: &str, err: &prometheus::Error) -> ExporterError {
    ExporterError::InvalidInstrument {
        name: name.to_string(),
        reason: err.to_string(),
    }
}
