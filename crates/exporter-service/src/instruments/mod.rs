//! Metric instruments with deferred registration.
//!
//! Node metrics are only meaningful while the daemon connection is up, so
//! every label-free instrument follows an explicit lifecycle:
//!
//! ```text
//! Unregistered --set/add--> Registered --unregister--> Unregistered
//! ```
//!
//! An instrument is invisible to `/metrics` until it receives its first
//! value, and disappears again when its owning handler unregisters it on
//! disconnect. Label-bearing instruments (`GaugeSet`, `CounterSet`) are
//! registered at declaration but only expose label combinations that have
//! been written, and `reset()` drops every combination at once.

pub mod registry;

pub use registry::InstrumentRegistry;

use prometheus::core::Collector;
use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Registry};
use tracing::{debug, warn};

/// Whether an instrument is currently attached to the export registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
}

/// Attach `collector` to `registry`, tolerating an existing registration.
fn attach(registry: &Registry, name: &str, collector: Box<dyn Collector>) -> bool {
    match registry.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => true,
        Err(e) => {
            warn!(
                target: "exporter.instruments",
                instrument = %name,
                error = %e,
                "Failed to register instrument"
            );
            false
        }
    }
}

/// Detach `collector` from `registry`; a missing registration is not an error.
fn detach(registry: &Registry, name: &str, collector: Box<dyn Collector>) {
    if let Err(e) = registry.unregister(collector) {
        debug!(
            target: "exporter.instruments",
            instrument = %name,
            error = %e,
            "Instrument was not registered"
        );
    }
}

/// A gauge registered on its first `set`.
pub struct LazyGauge {
    gauge: Gauge,
    registry: Registry,
    name: String,
    state: RegistrationState,
}

impl LazyGauge {
    pub(crate) fn new(gauge: Gauge, registry: Registry, name: String) -> Self {
        Self {
            gauge,
            registry,
            name,
            state: RegistrationState::Unregistered,
        }
    }

    /// Set the absolute value, registering the gauge if needed.
    ///
    /// The value is stored before registration so the first export that sees
    /// the gauge also sees this value.
    pub fn set(&mut self, value: f64) {
        self.gauge.set(value);
        if self.state == RegistrationState::Unregistered
            && attach(&self.registry, &self.name, Box::new(self.gauge.clone()))
        {
            self.state = RegistrationState::Registered;
        }
    }

    /// Detach from the registry. Safe to call repeatedly.
    pub fn unregister(&mut self) {
        if self.state == RegistrationState::Registered {
            detach(&self.registry, &self.name, Box::new(self.gauge.clone()));
        }
        self.state = RegistrationState::Unregistered;
    }

    #[must_use]
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Last value written (meaningful only while registered).
    #[must_use]
    pub fn value(&self) -> f64 {
        self.gauge.get()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A counter registered on its first `add`.
pub struct LazyCounter {
    counter: Counter,
    registry: Registry,
    name: String,
    state: RegistrationState,
}

impl LazyCounter {
    pub(crate) fn new(counter: Counter, registry: Registry, name: String) -> Self {
        Self {
            counter,
            registry,
            name,
            state: RegistrationState::Unregistered,
        }
    }

    /// Increase by `delta`, registering the counter if needed.
    ///
    /// Negative and NaN deltas are ignored; counters never decrease.
    pub fn add(&mut self, delta: f64) {
        if delta.is_nan() || delta < 0.0 {
            warn!(
                target: "exporter.instruments",
                instrument = %self.name,
                delta,
                "Ignoring non-monotonic counter update"
            );
            return;
        }
        self.counter.inc_by(delta);
        if self.state == RegistrationState::Unregistered
            && attach(&self.registry, &self.name, Box::new(self.counter.clone()))
        {
            self.state = RegistrationState::Registered;
        }
    }

    /// Detach from the registry and restart the count. Safe to call repeatedly.
    pub fn unregister(&mut self) {
        if self.state == RegistrationState::Registered {
            detach(&self.registry, &self.name, Box::new(self.counter.clone()));
        }
        self.counter.reset();
        self.state = RegistrationState::Unregistered;
    }

    #[must_use]
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.counter.get()
    }
}

/// A gauge indexed by a fixed-arity label set.
pub struct GaugeSet {
    vec: GaugeVec,
    name: String,
}

impl GaugeSet {
    pub(crate) fn new(vec: GaugeVec, name: String) -> Self {
        Self { vec, name }
    }

    /// Set the value of one label combination.
    ///
    /// A label list of the wrong arity is logged and dropped.
    pub fn set(&self, labels: &[&str], value: f64) {
        match self.vec.get_metric_with_label_values(labels) {
            Ok(gauge) => gauge.set(value),
            Err(e) => warn!(
                target: "exporter.instruments",
                instrument = %self.name,
                error = %e,
                "Dropping gauge update with invalid labels"
            ),
        }
    }

    /// Remove one label combination; unknown combinations are ignored.
    pub fn remove(&self, labels: &[&str]) {
        let _ = self.vec.remove_label_values(labels);
    }

    /// Drop every label combination.
    pub fn reset(&self) {
        self.vec.reset();
    }

    /// Current value of one label combination, if it has been written.
    #[must_use]
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        self.vec
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let pairs = metric.get_label();
                pairs.len() == labels.len()
                    && labels
                        .iter()
                        .all(|value| pairs.iter().any(|pair| pair.get_value() == *value))
            })
            .map(|metric| metric.get_gauge().get_value())
    }
}

/// A counter indexed by a fixed-arity label set.
pub struct CounterSet {
    vec: CounterVec,
    name: String,
}

impl CounterSet {
    pub(crate) fn new(vec: CounterVec, name: String) -> Self {
        Self { vec, name }
    }

    /// Increase one label combination by `delta`.
    pub fn increment(&self, labels: &[&str], delta: f64) {
        if delta.is_nan() || delta < 0.0 {
            warn!(
                target: "exporter.instruments",
                instrument = %self.name,
                delta,
                "Ignoring non-monotonic counter update"
            );
            return;
        }
        match self.vec.get_metric_with_label_values(labels) {
            Ok(counter) => counter.inc_by(delta),
            Err(e) => warn!(
                target: "exporter.instruments",
                instrument = %self.name,
                error = %e,
                "Dropping counter update with invalid labels"
            ),
        }
    }

    /// Drop every label combination.
    pub fn reset(&self) {
        self.vec.reset();
    }
}
