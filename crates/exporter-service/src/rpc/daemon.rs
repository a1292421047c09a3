//! Daemon websocket transport.
//!
//! Every message on the daemon socket is a JSON envelope:
//!
//! ```text
//! {"command": ..., "ack": bool, "data": {...}, "request_id": ...,
//!  "destination": ..., "origin": ...}
//! ```
//!
//! The exporter registers itself as `<prefix>_agent` and subscribes to the
//! `metrics` broadcast. Service events and responses to its own requests
//! both arrive as envelopes whose `origin` names the service.

use super::{DaemonConnector, DaemonRequest, DaemonSession, RpcError, RpcRequester};
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

/// Destination of daemon-level commands.
pub const DAEMON_DESTINATION: &str = "daemon";

/// Broadcast channel carrying service metrics events.
pub const METRICS_SERVICE: &str = "metrics";

/// Largest accepted message. Plot listings of big farms run to tens of MiB.
const MAX_MESSAGE_SIZE: usize = 64 << 20;

/// Name the exporter registers under.
#[must_use]
pub fn agent_name(prefix: &str) -> String {
    format!("{prefix}_agent")
}

/// Requests that subscribe a fresh session to everything the exporter needs.
#[must_use]
pub fn subscription_requests(prefix: &str) -> Vec<DaemonRequest> {
    [agent_name(prefix), METRICS_SERVICE.to_string()]
        .into_iter()
        .map(|service| DaemonRequest {
            destination: DAEMON_DESTINATION.to_string(),
            command: "register_service".to_string(),
            data: serde_json::json!({ "service": service }),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct OutboundEnvelope<'a> {
    command: &'a str,
    ack: bool,
    data: &'a serde_json::Value,
    request_id: String,
    destination: &'a str,
    origin: &'a str,
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    command: String,
    #[serde(default)]
    origin: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

/// Serialize a request into a daemon envelope sent from `origin`.
/// Socket limits sized for large plot listings.
fn websocket_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..WebSocketConfig::default()
    }
}

pub(crate) fn encode_request(request: &DaemonRequest, origin: &str) -> Result<String, RpcError> {
    let envelope = OutboundEnvelope {
        command: &request.command,
        ack: false,
        data: &request.data,
        request_id: Uuid::new_v4().simple().to_string(),
        destination: &request.destination,
        origin,
    };
    serde_json::to_string(&envelope).map_err(|e| RpcError::Decode(e.to_string()))
}

/// Parse one daemon envelope into an event, keeping `data` as raw JSON.
pub(crate) fn decode_event(text: &[u8]) -> Result<Event, RpcError> {
    let envelope: InboundEnvelope =
        serde_json::from_slice(text).map_err(|e| RpcError::Decode(e.to_string()))?;
    let data = envelope.data.map_or_else(
        || Bytes::from_static(b"{}"),
        |raw| Bytes::copy_from_slice(raw.get().as_bytes()),
    );
    Ok(Event::new(envelope.origin, envelope.command, data))
}

/// Opens mutually-authenticated websocket sessions to the daemon.
pub struct WebsocketConnector {
    url: String,
    origin: String,
    tls: Arc<rustls::ClientConfig>,
}

impl WebsocketConnector {
    #[must_use]
    pub fn new(url: impl Into<String>, prefix: &str, tls: Arc<rustls::ClientConfig>) -> Self {
        Self {
            url: url.into(),
            origin: agent_name(prefix),
            tls,
        }
    }
}

#[async_trait]
impl DaemonConnector for WebsocketConnector {
    async fn connect(&self) -> Result<Box<dyn DaemonSession>, RpcError> {
        let (stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
            self.url.as_str(),
            Some(websocket_config()),
            false,
            Some(Connector::Rustls(Arc::clone(&self.tls))),
        )
        .await
        .map_err(|e| RpcError::Transport(format!("{}: {e}", self.url)))?;

        debug!(target: "exporter.daemon", url = %self.url, "Websocket connected");

        Ok(Box::new(WebsocketSession {
            stream,
            origin: self.origin.clone(),
        }))
    }
}

struct WebsocketSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    origin: String,
}

#[async_trait]
impl DaemonSession for WebsocketSession {
    async fn next_event(&mut self) -> Result<Option<Event>, RpcError> {
        // No await between receiving a frame and returning it, so dropping
        // this future never loses an event.
        while let Some(message) = self.stream.next().await {
            let message = message.map_err(|e| RpcError::Transport(e.to_string()))?;
            let payload = match &message {
                Message::Text(text) => text.as_bytes(),
                Message::Binary(bytes) => bytes.as_slice(),
                Message::Close(frame) => {
                    debug!(target: "exporter.daemon", frame = ?frame, "Daemon closed the connection");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            match decode_event(payload) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    warn!(
                        target: "exporter.daemon",
                        error = %e,
                        "Skipping undecodable daemon message"
                    );
                }
            }
        }
        Ok(None)
    }

    async fn send(&mut self, request: DaemonRequest) -> Result<(), RpcError> {
        let text = encode_request(&request, &self.origin)?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}

/// Fire-and-forget requester backed by the lifecycle loop's outbound queue.
///
/// Handlers call [`RpcRequester::request`] from inside event handling; the
/// lifecycle loop owns the receiver and writes queued requests to whichever
/// session is live.
#[derive(Debug, Clone)]
pub struct DaemonRequester {
    prefix: String,
    outbound: mpsc::UnboundedSender<DaemonRequest>,
}

impl DaemonRequester {
    /// Create a requester and the receiver the lifecycle loop drains.
    #[must_use]
    pub fn channel(prefix: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<DaemonRequest>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                prefix: prefix.into(),
                outbound,
            },
            rx,
        )
    }
}

impl RpcRequester for DaemonRequester {
    fn request(
        &self,
        destination: ServiceKind,
        command: &str,
        data: serde_json::Value,
    ) -> Result<(), RpcError> {
        self.outbound
            .send(DaemonRequest {
                destination: destination.daemon_name(&self.prefix),
                command: command.to_string(),
                data,
            })
            .map_err(|_| RpcError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_raises_message_limits() {
        let config = websocket_config();
        assert_eq!(config.max_message_size, Some(MAX_MESSAGE_SIZE));
        assert_eq!(config.max_frame_size, Some(MAX_MESSAGE_SIZE));
        assert_eq!(
            config.write_buffer_size,
            WebSocketConfig::default().write_buffer_size
        );
    }

    #[test]
    fn test_subscription_requests() {
        let requests = subscription_requests("stai");
        let services: Vec<_> = requests
            .iter()
            .map(|r| r.data["service"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(services, ["stai_agent", "metrics"]);
        assert!(requests
            .iter()
            .all(|r| r.destination == DAEMON_DESTINATION && r.command == "register_service"));
    }

    #[test]
    fn test_encode_request_envelope() {
        let request = DaemonRequest {
            destination: "stai_wallet".to_string(),
            command: "get_wallet_balance".to_string(),
            data: serde_json::json!({ "wallet_id": 1 }),
        };

        let text = encode_request(&request, "stai_agent").unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["command"], "get_wallet_balance");
        assert_eq!(value["destination"], "stai_wallet");
        assert_eq!(value["origin"], "stai_agent");
        assert_eq!(value["ack"], false);
        assert_eq!(value["data"]["wallet_id"], 1);
        assert_eq!(value["request_id"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn test_decode_event_keeps_raw_data() {
        let text = br#"{
            "ack": true,
            "command": "get_wallet_balance",
            "data": {"wallet_balance": {"confirmed_wallet_balance": 340282366920938463463374607431768211455}},
            "destination": "stai_agent",
            "origin": "stai_wallet",
            "request_id": "abc"
        }"#;

        let event = decode_event(text).unwrap();
        assert_eq!(event.origin, "stai_wallet");
        assert_eq!(event.command, "get_wallet_balance");
        // Large integers survive untouched
        assert!(std::str::from_utf8(&event.data)
            .unwrap()
            .contains("340282366920938463463374607431768211455"));
    }

    #[test]
    fn test_decode_event_without_data() {
        let event = decode_event(br#"{"command": "register_service", "origin": "daemon"}"#).unwrap();
        assert_eq!(event.data.as_ref(), b"{}");
    }

    #[test]
    fn test_decode_event_rejects_garbage() {
        assert!(matches!(decode_event(b"not json"), Err(RpcError::Decode(_))));
    }

    #[tokio::test]
    async fn test_requester_queues_with_daemon_name() {
        let (requester, mut rx) = DaemonRequester::channel("stai");

        requester
            .request(ServiceKind::Crawler, "get_peer_counts", serde_json::json!({}))
            .unwrap();

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.destination, "stai_crawler");
        assert_eq!(queued.command, "get_peer_counts");
    }

    #[test]
    fn test_requester_closed_queue() {
        let (requester, rx) = DaemonRequester::channel("stai");
        drop(rx);

        let result = requester.request(ServiceKind::Wallet, "get_wallets", serde_json::json!({}));
        assert!(matches!(result, Err(RpcError::Closed)));
    }
}
