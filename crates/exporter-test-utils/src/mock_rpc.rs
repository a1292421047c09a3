//! Mock RPC collaborators.
//!
//! - [`MockRequester`] records fire-and-forget requests queued by handlers.
//! - [`MockBulkFetcher`] serves fixed HTTP RPC responses and records the
//!   filters it was called with.
//!
//! # Example
//!
//! ```rust,ignore
//! let requester = Arc::new(MockRequester::new());
//! handler.seed_initial_data().await;
//! assert_eq!(requester.commands(), ["get_wallets", "get_sync_status"]);
//! ```

use async_trait::async_trait;
use exporter_service::rpc::types::{
    GetPlotsResponse, IpsAfterTimestampOptions, IpsAfterTimestampResponse, PlotInfo,
};
use exporter_service::rpc::{BulkFetcher, RpcError, RpcRequester};
use exporter_service::types::ServiceKind;
use std::sync::Mutex;
use std::time::Duration;

/// One request recorded by [`MockRequester`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub destination: ServiceKind,
    pub command: String,
    pub data: serde_json::Value,
}

/// Requester that records every request.
#[derive(Debug, Default)]
pub struct MockRequester {
    calls: Mutex<Vec<RecordedRequest>>,
    closed: bool,
}

impl MockRequester {
    /// Create a requester that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a requester whose queue is closed; every request fails.
    #[must_use]
    pub fn closed() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            closed: true,
        }
    }

    /// Every accepted request, in order.
    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands of every accepted request, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.command)
            .collect()
    }

    /// Commands sent to one service, in order.
    pub fn commands_for(&self, service: ServiceKind) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.destination == service)
            .map(|call| call.command)
            .collect()
    }

    /// Forget recorded requests.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl RpcRequester for MockRequester {
    fn request(
        &self,
        destination: ServiceKind,
        command: &str,
        data: serde_json::Value,
    ) -> Result<(), RpcError> {
        if self.closed {
            return Err(RpcError::Closed);
        }
        self.calls.lock().unwrap().push(RecordedRequest {
            destination,
            command: command.to_string(),
            data,
        });
        Ok(())
    }
}

/// Bulk fetcher serving fixed responses.
#[derive(Debug, Default)]
pub struct MockBulkFetcher {
    ips: Vec<String>,
    plots: Vec<PlotInfo>,
    failing: bool,
    ip_requests: Mutex<Vec<IpsAfterTimestampOptions>>,
    plot_requests: Mutex<usize>,
}

impl MockBulkFetcher {
    /// Create a fetcher with no addresses and no plots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses returned by `get_ips_after_timestamp`.
    #[must_use]
    pub fn with_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ips = ips.into_iter().map(Into::into).collect();
        self
    }

    /// Plots returned by `get_plots`.
    #[must_use]
    pub fn with_plots(mut self, plots: Vec<PlotInfo>) -> Self {
        self.plots = plots;
        self
    }

    /// Make every call time out.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Filters passed to `get_ips_after_timestamp`, in order.
    pub fn ip_requests(&self) -> Vec<IpsAfterTimestampOptions> {
        self.ip_requests.lock().unwrap().clone()
    }

    /// Number of `get_plots` calls.
    pub fn plot_requests(&self) -> usize {
        *self.plot_requests.lock().unwrap()
    }
}

#[async_trait]
impl BulkFetcher for MockBulkFetcher {
    async fn get_ips_after_timestamp(
        &self,
        options: &IpsAfterTimestampOptions,
    ) -> Result<IpsAfterTimestampResponse, RpcError> {
        self.ip_requests.lock().unwrap().push(options.clone());
        if self.failing {
            return Err(RpcError::Timeout(Duration::from_secs(30)));
        }

        let limit = usize::try_from(options.limit).unwrap_or(usize::MAX);
        let ips: Vec<String> = self.ips.iter().take(limit).cloned().collect();
        Ok(IpsAfterTimestampResponse {
            total: ips.len() as u64,
            ips,
        })
    }

    async fn get_plots(&self) -> Result<GetPlotsResponse, RpcError> {
        *self.plot_requests.lock().unwrap() += 1;
        if self.failing {
            return Err(RpcError::Timeout(Duration::from_secs(30)));
        }
        Ok(GetPlotsResponse {
            plots: self.plots.clone(),
        })
    }
}
