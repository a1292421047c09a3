//! Transport seams.
//!
//! The exporter talks to the node through two channels:
//!
//! - the **daemon websocket** ([`DaemonConnector`] / [`DaemonSession`]),
//!   which pushes events and carries fire-and-forget requests whose
//!   responses come back as events ([`RpcRequester`]);
//! - the per-service **HTTP RPC** ([`BulkFetcher`]), used for payloads too
//!   large for the websocket or that need query filters.
//!
//! Handlers and the lifecycle controller only see these traits; the
//! `daemon` and `http` submodules hold the real implementations.

pub mod daemon;
pub mod http;
pub mod tls;
pub mod types;

use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use types::{GetPlotsResponse, IpsAfterTimestampOptions, IpsAfterTimestampResponse};

/// RPC error type.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The service answered with `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The connection or request queue is closed.
    #[error("Connection closed")]
    Closed,
}

impl RpcError {
    /// Short label for metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            RpcError::Transport(_) => "transport",
            RpcError::Timeout(_) => "timeout",
            RpcError::Decode(_) => "decode",
            RpcError::Rejected(_) => "rejected",
            RpcError::Closed => "closed",
        }
    }
}

/// A request sent over the daemon websocket.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonRequest {
    /// Daemon service name the request is routed to (e.g. `stai_wallet`).
    pub destination: String,
    pub command: String,
    pub data: serde_json::Value,
}

/// Fire-and-forget requests over the primary channel.
///
/// The response is delivered later as an [`Event`] whose command matches
/// the request's command.
pub trait RpcRequester: Send + Sync {
    fn request(
        &self,
        destination: ServiceKind,
        command: &str,
        data: serde_json::Value,
    ) -> Result<(), RpcError>;
}

/// Request/response calls over the secondary (HTTP) channel.
#[async_trait]
pub trait BulkFetcher: Send + Sync {
    /// Crawler: peer addresses seen after a timestamp.
    async fn get_ips_after_timestamp(
        &self,
        options: &IpsAfterTimestampOptions,
    ) -> Result<IpsAfterTimestampResponse, RpcError>;

    /// Harvester: full plot listing.
    async fn get_plots(&self) -> Result<GetPlotsResponse, RpcError>;
}

/// One live daemon connection.
#[async_trait]
pub trait DaemonSession: Send {
    /// Next event from the daemon.
    ///
    /// `Ok(None)` means the peer closed the connection. Implementations must
    /// be cancel-safe: dropping the future must not lose a received event.
    async fn next_event(&mut self) -> Result<Option<Event>, RpcError>;

    /// Send one request.
    async fn send(&mut self, request: DaemonRequest) -> Result<(), RpcError>;
}

/// Opens daemon sessions.
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DaemonSession>, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_labels_are_bounded() {
        let errors = [
            RpcError::Transport("refused".to_string()),
            RpcError::Timeout(Duration::from_secs(30)),
            RpcError::Decode("eof".to_string()),
            RpcError::Rejected("unknown command".to_string()),
            RpcError::Closed,
        ];
        let labels: Vec<_> = errors.iter().map(RpcError::as_label).collect();
        assert_eq!(
            labels,
            ["transport", "timeout", "decode", "rejected", "closed"]
        );
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            RpcError::Timeout(Duration::from_secs(5)).to_string(),
            "Request timed out after 5s"
        );
        assert_eq!(
            RpcError::Rejected("not synced".to_string()).to_string(),
            "Request rejected: not synced"
        );
    }
}
