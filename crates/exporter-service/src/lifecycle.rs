//! Connection lifecycle controller.
//!
//! Owns the daemon session and is the single task that drives the event
//! path:
//!
//! 1. Connect and subscribe. Failure here is fatal.
//! 2. Mark ready, seed every handler.
//! 3. Pump: write queued requests, dispatch inbound events one at a time.
//! 4. On drop: mark not ready, run every `on_disconnect`, retry every
//!    `reconnect_interval` until a session opens again.
//! 5. On reconnect: discard requests queued for the dead session, mark
//!    ready, run every `on_reconnect`, back to 3.
//!
//! Each disconnect and reconnect transition reaches the handlers exactly
//! once. Cancellation ends the loop at any await point.

use crate::dispatch::EventDispatcher;
use crate::errors::ExporterError;
use crate::observability::metrics::{record_daemon_reconnect, set_daemon_connected};
use crate::observability::HealthState;
use crate::rpc::daemon::subscription_requests;
use crate::rpc::{DaemonConnector, DaemonRequest, DaemonSession, RpcError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why the pump loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Dropped,
}

/// Drives the daemon session and the handlers behind the dispatcher.
pub struct ConnectionLifecycle {
    connector: Arc<dyn DaemonConnector>,
    dispatcher: EventDispatcher,
    outbound: mpsc::UnboundedReceiver<DaemonRequest>,
    health: Arc<HealthState>,
    prefix: String,
    reconnect_interval: Duration,
}

impl ConnectionLifecycle {
    /// `outbound` is the receiving end of the handlers' `DaemonRequester`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn DaemonConnector>,
        dispatcher: EventDispatcher,
        outbound: mpsc::UnboundedReceiver<DaemonRequest>,
        health: Arc<HealthState>,
        prefix: impl Into<String>,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            connector,
            dispatcher,
            outbound,
            health,
            prefix: prefix.into(),
            reconnect_interval,
        }
    }

    /// Run until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `ExporterError::Transport` if the first session cannot be
    /// opened. Later drops are retried indefinitely.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ExporterError> {
        let mut session = tokio::select! {
            () = cancel.cancelled() => {
                info!(target: "exporter.lifecycle", "Cancelled before connecting");
                return Ok(());
            }
            result = open_session(self.connector.as_ref(), &self.prefix) => result.map_err(|e| {
                error!(target: "exporter.lifecycle", error = %e, "Failed to connect to daemon");
                ExporterError::Transport(e.to_string())
            })?,
        };

        info!(target: "exporter.lifecycle", "Connected to daemon");
        self.mark_connected();
        self.dispatcher.seed_all().await;

        loop {
            if self.pump(session.as_mut(), &cancel).await == SessionEnd::Cancelled {
                break;
            }

            self.mark_disconnected();
            self.dispatcher.disconnect_all();

            let Some(next) = reconnect(
                self.connector.as_ref(),
                &self.prefix,
                self.reconnect_interval,
                &cancel,
            )
            .await
            else {
                break;
            };
            session = next;

            record_daemon_reconnect();
            self.discard_stale_requests();
            self.mark_connected();
            self.dispatcher.reconnect_all().await;
        }

        self.mark_disconnected();
        info!(target: "exporter.lifecycle", "Lifecycle stopped");
        Ok(())
    }

    /// Move requests and events until the session drops or `cancel` fires.
    async fn pump(
        &mut self,
        session: &mut dyn DaemonSession,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                Some(request) = self.outbound.recv() => {
                    if let Err(e) = session.send(request).await {
                        warn!(target: "exporter.lifecycle", error = %e, "Failed to send request");
                        return SessionEnd::Dropped;
                    }
                }
                result = session.next_event() => match result {
                    Ok(Some(event)) => self.dispatcher.dispatch(&event).await,
                    Ok(None) => {
                        warn!(target: "exporter.lifecycle", "Daemon closed the session");
                        return SessionEnd::Dropped;
                    }
                    Err(e) => {
                        warn!(target: "exporter.lifecycle", error = %e, "Daemon session failed");
                        return SessionEnd::Dropped;
                    }
                },
            }
        }
    }

    /// Drop requests queued while the session was down.
    fn discard_stale_requests(&mut self) {
        let mut discarded = 0usize;
        while self.outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(target: "exporter.lifecycle", discarded, "Discarded stale requests");
        }
    }

    fn mark_connected(&self) {
        self.health.set_ready();
        set_daemon_connected(true);
    }

    fn mark_disconnected(&self) {
        self.health.set_not_ready();
        set_daemon_connected(false);
    }
}

/// Connect and send the subscription requests.
async fn open_session(
    connector: &dyn DaemonConnector,
    prefix: &str,
) -> Result<Box<dyn DaemonSession>, RpcError> {
    let mut session = connector.connect().await?;
    for request in subscription_requests(prefix) {
        session.send(request).await?;
    }
    Ok(session)
}

/// Retry every `interval` until a session opens; `None` if cancelled first.
async fn reconnect(
    connector: &dyn DaemonConnector,
    prefix: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<Box<dyn DaemonSession>> {
    let mut attempt: u32 = 0;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(interval) => {}
        }
        attempt = attempt.saturating_add(1);

        tokio::select! {
            () = cancel.cancelled() => return None,
            result = open_session(connector, prefix) => match result {
                Ok(session) => {
                    info!(target: "exporter.lifecycle", attempt, "Reconnected to daemon");
                    return Some(session);
                }
                Err(e) => {
                    warn!(
                        target: "exporter.lifecycle",
                        attempt,
                        error = %e,
                        "Reconnect failed, will retry"
                    );
                }
            },
        }
    }
}
