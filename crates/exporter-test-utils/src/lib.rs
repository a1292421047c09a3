//! # Exporter Test Utilities
//!
//! Shared test utilities for the metrics exporter.
//!
//! This crate provides mock collaborators and fixtures for testing handlers,
//! the dispatcher and the lifecycle controller without a running node.
//!
//! ## Modules
//!
//! - `mock_rpc` - Recording requester and scripted HTTP bulk fetcher
//! - `mock_geo` - Static address → country table
//! - `mock_daemon` - Scripted daemon connector and sessions
//! - `fixtures` - Daemon event payload builders
//! - `assertions` - Helpers over the `/metrics` text output
//! - `server_harness` - `TestExporterServer` for HTTP tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use exporter_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let geo = StaticGeo::new().with_country("1.1.1.1", "US", "United States");
//!     let bulk = MockBulkFetcher::new().with_ips(["1.1.1.1"]);
//!     let requester = Arc::new(MockRequester::new());
//!
//!     let ctx = ServiceContext::new(requester.clone())
//!         .with_bulk(Arc::new(bulk))
//!         .with_geo(Arc::new(geo));
//!
//!     // Build handlers with `ctx` and feed them `fixtures::*` events...
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_daemon;
pub mod mock_geo;
pub mod mock_rpc;
pub mod server_harness;

// Re-export commonly used items
pub use assertions::{assert_absent, assert_sample, sample_value};
pub use mock_daemon::{MockConnector, SentRequest, SessionScript};
pub use mock_geo::StaticGeo;
pub use mock_rpc::{MockBulkFetcher, MockRequester};
pub use server_harness::TestExporterServer;
