//! Shared types: watched services and inbound events.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::fmt;

/// A node service the exporter watches.
///
/// Doubles as the metric subsystem (`<prefix>_<service>_<name>`) and as the
/// dispatch key for inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    FullNode,
    Wallet,
    Crawler,
    Timelord,
    Harvester,
    Farmer,
}

impl ServiceKind {
    /// Every watched service, in dispatch order.
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::FullNode,
        ServiceKind::Wallet,
        ServiceKind::Crawler,
        ServiceKind::Timelord,
        ServiceKind::Harvester,
        ServiceKind::Farmer,
    ];

    /// Returns the service name used in metric names and daemon addresses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::FullNode => "full_node",
            ServiceKind::Wallet => "wallet",
            ServiceKind::Crawler => "crawler",
            ServiceKind::Timelord => "timelord",
            ServiceKind::Harvester => "harvester",
            ServiceKind::Farmer => "farmer",
        }
    }

    /// Daemon service name, e.g. `stai_wallet`.
    #[must_use]
    pub fn daemon_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.as_str())
    }

    /// Resolve an event origin (`stai_wallet`) back to a service.
    ///
    /// Returns `None` for anything that is not one of the watched services,
    /// including origins that carry a different network prefix.
    #[must_use]
    pub fn from_daemon_name(prefix: &str, origin: &str) -> Option<Self> {
        let name = origin.strip_prefix(prefix)?.strip_prefix('_')?;
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message pushed by the daemon.
///
/// The payload is kept as raw JSON bytes and decoded by the handler that
/// owns the command, so large integers (wallet balances) can be read as
/// `u128` without passing through an intermediate `f64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub origin: String,
    pub command: String,
    pub data: Bytes,
}

impl Event {
    #[must_use]
    pub fn new(
        origin: impl Into<String>,
        command: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            origin: origin.into(),
            command: command.into(),
            data: data.into(),
        }
    }

    /// Decode the payload into a command-specific type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}
