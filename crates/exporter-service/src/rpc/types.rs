//! Payloads shared by the daemon and HTTP channels.

use serde::{Deserialize, Serialize};

/// Filter for the crawler's `get_ips_after_timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpsAfterTimestampOptions {
    /// Unix timestamp (seconds); only peers seen after it are returned.
    pub after: i64,
    pub offset: u64,
    pub limit: u64,
}

/// Response to `get_ips_after_timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IpsAfterTimestampResponse {
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub total: u64,
}

/// One plot as reported by the harvester.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlotInfo {
    /// k size of the plot.
    pub size: u8,
    pub file_size: u64,
    /// Set for pool (portable) plots, absent or empty for solo (OG) plots.
    #[serde(default)]
    pub pool_contract_puzzle_hash: Option<String>,
    #[serde(default)]
    pub filename: String,
}

impl PlotInfo {
    /// Whether the plot is a pool plot.
    #[must_use]
    pub fn is_pool(&self) -> bool {
        self.pool_contract_puzzle_hash
            .as_deref()
            .is_some_and(|hash| !hash.is_empty())
    }
}

/// Response to the harvester's `get_plots`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GetPlotsResponse {
    #[serde(default)]
    pub plots: Vec<PlotInfo>,
}
