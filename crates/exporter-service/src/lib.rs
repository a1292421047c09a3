//! Node Services Metrics Exporter Library
//!
//! Watches the services of a STAI node (full node, wallet, crawler,
//! timelord, harvester, farmer) through the daemon websocket and exposes
//! their state as Prometheus metrics.
//!
//! # Architecture
//!
//! ```text
//! daemon websocket
//!   └── ConnectionLifecycle (one task: connect, subscribe, seed, reconnect)
//!       └── EventDispatcher (routes by event origin)
//!           └── ServiceMetrics handler per service
//!               ├── instruments in the shared InstrumentRegistry
//!               └── crawler country pipeline (HTTP RPC + geo lookup)
//!
//! HTTP server: /metrics reads the registry concurrently with the above
//! ```
//!
//! # Key Design Decisions
//!
//! - **Lazy registration**: a node instrument only appears on `/metrics`
//!   after it receives a value, and disappears on disconnect
//! - **Single event path**: handlers never run concurrently; the lifecycle
//!   task owns every handler through the dispatcher
//! - **Errors stop at the handler**: decode and request failures are logged
//!   and the event is dropped; only startup failures are returned
//!
//! # Modules
//!
//! - [`instruments`] - Lazy gauges/counters and the instrument registry
//! - [`services`] - One handler per watched service
//! - [`dispatch`] - Event routing
//! - [`lifecycle`] - Daemon session lifecycle
//! - [`rpc`] - Daemon websocket and HTTP RPC transports
//! - [`geo`] - Country lookup for crawler peers
//! - [`observability`] - HTTP surface and exporter self-metrics

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod geo;
pub mod instruments;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod services;
pub mod types;
