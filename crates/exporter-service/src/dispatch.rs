//! Routes daemon events to service handlers.
//!
//! The dispatcher owns every handler and is driven from a single task, so
//! handlers never run concurrently with each other or with the lifecycle
//! callbacks. Routing is by event origin only; each handler matches on the
//! command itself.

use crate::observability::metrics::{record_event_dropped, record_event_received, REASON_UNROUTABLE};
use crate::services::ServiceMetrics;
use crate::types::{Event, ServiceKind};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Event router over the registered service handlers.
pub struct EventDispatcher {
    prefix: String,
    handlers: BTreeMap<ServiceKind, Box<dyn ServiceMetrics>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher for origins named `<prefix>_<service>`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            handlers: BTreeMap::new(),
        }
    }

    /// Create a dispatcher holding `handlers`.
    #[must_use]
    pub fn with_handlers(
        prefix: impl Into<String>,
        handlers: impl IntoIterator<Item = Box<dyn ServiceMetrics>>,
    ) -> Self {
        let mut dispatcher = Self::new(prefix);
        for handler in handlers {
            dispatcher.register(handler);
        }
        dispatcher
    }

    /// Register a handler, replacing any previous handler for its service.
    pub fn register(&mut self, handler: Box<dyn ServiceMetrics>) {
        let service = handler.service();
        if self.handlers.insert(service, handler).is_some() {
            warn!(
                target: "exporter.dispatch",
                service = %service,
                "Replaced existing handler"
            );
        }
    }

    /// Services with a registered handler, in dispatch order.
    pub fn services(&self) -> impl Iterator<Item = ServiceKind> + '_ {
        self.handlers.keys().copied()
    }

    /// Deliver one event to the handler for its origin.
    ///
    /// Events from unknown origins are dropped without error.
    pub async fn dispatch(&mut self, event: &Event) {
        debug!(
            target: "exporter.dispatch",
            origin = %event.origin,
            command = %event.command,
            "Received event"
        );

        let handler = ServiceKind::from_daemon_name(&self.prefix, &event.origin)
            .and_then(|service| self.handlers.get_mut(&service));
        let Some(handler) = handler else {
            debug!(
                target: "exporter.dispatch",
                origin = %event.origin,
                "No handler for origin"
            );
            record_event_dropped("unknown", REASON_UNROUTABLE);
            return;
        };

        record_event_received(handler.service().as_str());
        handler.handle_event(event).await;
    }

    /// Seed every handler after the first connection.
    pub async fn seed_all(&mut self) {
        for handler in self.handlers.values_mut() {
            handler.seed_initial_data().await;
        }
    }

    /// Clear connection-scoped state on every handler.
    pub fn disconnect_all(&mut self) {
        debug!(target: "exporter.dispatch", "Calling disconnect handlers");
        for handler in self.handlers.values_mut() {
            handler.on_disconnect();
        }
    }

    /// Re-seed every handler after a reconnect.
    pub async fn reconnect_all(&mut self) {
        debug!(target: "exporter.dispatch", "Calling reconnect handlers");
        for handler in self.handlers.values_mut() {
            handler.on_reconnect().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records every callback it receives.
    struct CallLog {
        service: ServiceKind,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ServiceMetrics for CallLog {
        fn service(&self) -> ServiceKind {
            self.service
        }

        async fn seed_initial_data(&mut self) {
            self.log.lock().unwrap().push(format!("{}:seed", self.service));
        }

        async fn handle_event(&mut self, event: &Event) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.service, event.command));
        }

        fn on_disconnect(&mut self) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:disconnect", self.service));
        }
    }

    fn dispatcher(log: &Arc<Mutex<Vec<String>>>) -> EventDispatcher {
        EventDispatcher::with_handlers(
            "stai",
            [ServiceKind::Wallet, ServiceKind::FullNode].map(|service| {
                Box::new(CallLog {
                    service,
                    log: Arc::clone(log),
                }) as Box<dyn ServiceMetrics>
            }),
        )
    }

    #[tokio::test]
    async fn test_routes_by_origin() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(&log);

        dispatcher
            .dispatch(&Event::new("stai_wallet", "coin_added", "{}"))
            .await;
        dispatcher
            .dispatch(&Event::new("stai_full_node", "block", "{}"))
            .await;

        assert_eq!(
            *log.lock().unwrap(),
            ["wallet:coin_added", "full_node:block"]
        );
    }

    #[tokio::test]
    async fn test_unknown_origin_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(&log);

        for origin in ["stai_daemon", "chia_wallet", "stai_farmer", ""] {
            dispatcher.dispatch(&Event::new(origin, "anything", "{}")).await;
        }

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_reconnect_reseeds() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(&log);

        dispatcher.seed_all().await;
        dispatcher.disconnect_all();
        dispatcher.reconnect_all().await;

        // BTreeMap order follows ServiceKind
        assert_eq!(
            *log.lock().unwrap(),
            [
                "full_node:seed",
                "wallet:seed",
                "full_node:disconnect",
                "wallet:disconnect",
                "full_node:seed",
                "wallet:seed",
            ]
        );
    }

    #[test]
    fn test_register_replaces_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(&log);
        dispatcher.register(Box::new(CallLog {
            service: ServiceKind::Wallet,
            log: Arc::clone(&log),
        }));

        assert_eq!(
            dispatcher.services().collect::<Vec<_>>(),
            [ServiceKind::FullNode, ServiceKind::Wallet]
        );
    }
}
