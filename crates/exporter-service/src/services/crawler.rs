//! Crawler metrics and the peer → country aggregation pipeline.
//!
//! Each peer-count snapshot updates the headline gauges directly. When both
//! a geo database and the HTTP channel are available it also starts an
//! aggregation pass:
//!
//! 1. fetch up to `total_last_5_days` addresses seen in the last five days;
//! 2. look up each address's country, skipping misses;
//! 3. count addresses per ISO code in a pass-local map;
//! 4. publish one `country_node_count` gauge per country seen.
//!
//! Countries absent from a pass keep their last published value until the
//! session drops.

use super::{decode_payload, gauge_value, ServiceContext, ServiceMetrics};
use crate::errors::ExporterError;
use crate::geo::GeoLookup;
use crate::instruments::{GaugeSet, InstrumentRegistry, LazyGauge};
use crate::observability::metrics::record_geo_lookup_miss;
use crate::rpc::types::IpsAfterTimestampOptions;
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use tracing::{debug, info, warn};

const SERVICE: ServiceKind = ServiceKind::Crawler;

/// Window used by the crawler's "last 5 days" counters.
const PEER_WINDOW_SECS: i64 = 5 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
struct PeerCountsResponse {
    peer_counts: Option<PeerCounts>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PeerCounts {
    total_last_5_days: u64,
    reliable_nodes: u64,
    ipv4_last_5_days: u64,
    ipv6_last_5_days: u64,
    versions: HashMap<String, u64>,
}

/// Peer count for one country within a single aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryAggregate {
    pub iso_code: String,
    /// Primary-locale name from the first address seen for this country.
    pub display_name: String,
    pub count: u64,
}

/// Count addresses per country.
///
/// Addresses that fail to parse, are unknown to the database, or map to an
/// empty ISO code contribute to no country.
pub fn aggregate_countries(
    geo: &dyn GeoLookup,
    addresses: &[String],
) -> BTreeMap<String, CountryAggregate> {
    let mut countries: BTreeMap<String, CountryAggregate> = BTreeMap::new();

    for address in addresses {
        let info = match address.parse::<IpAddr>() {
            Ok(ip) => match geo.lookup(ip) {
                Ok(Some(info)) if !info.iso_code.is_empty() => info,
                Ok(_) => {
                    record_geo_lookup_miss();
                    continue;
                }
                Err(e) => {
                    debug!(target: "exporter.crawler", address = %address, error = %e, "Geo lookup failed");
                    record_geo_lookup_miss();
                    continue;
                }
            },
            Err(_) => {
                debug!(target: "exporter.crawler", address = %address, "Unparsable peer address");
                record_geo_lookup_miss();
                continue;
            }
        };

        countries
            .entry(info.iso_code.clone())
            .or_insert_with(|| CountryAggregate {
                display_name: info.display_name().to_string(),
                iso_code: info.iso_code.clone(),
                count: 0,
            })
            .count += 1;
    }

    countries
}

/// Crawler handler.
pub struct CrawlerMetrics {
    ctx: ServiceContext,
    total_nodes_5_days: LazyGauge,
    reliable_nodes: LazyGauge,
    ipv4_nodes_5_days: LazyGauge,
    ipv6_nodes_5_days: LazyGauge,
    peer_version: GaugeSet,
    country_node_count: GaugeSet,
}

impl CrawlerMetrics {
    pub fn initialize(
        registry: &InstrumentRegistry,
        ctx: &ServiceContext,
    ) -> Result<Self, ExporterError> {
        Ok(Self {
            ctx: ctx.clone(),
            total_nodes_5_days: registry.gauge(
                SERVICE,
                "total_nodes_5_days",
                "Total number of nodes gossiped with a timestamp in the last 5 days. The crawler did not necessarily connect to all of them.",
            )?,
            reliable_nodes: registry.gauge(
                SERVICE,
                "reliable_nodes",
                "Nodes with the node port open and room for more peer connections",
            )?,
            ipv4_nodes_5_days: registry.gauge(
                SERVICE,
                "ipv4_nodes_5_days",
                "IPv4 nodes gossiped with a timestamp in the last 5 days",
            )?,
            ipv6_nodes_5_days: registry.gauge(
                SERVICE,
                "ipv6_nodes_5_days",
                "IPv6 nodes gossiped with a timestamp in the last 5 days",
            )?,
            peer_version: registry.gauge_set(
                SERVICE,
                "peer_version",
                "Number of peers per version. Only peers the crawler connected to are included.",
                &["version"],
            )?,
            country_node_count: registry.gauge_set(
                SERVICE,
                "country_node_count",
                "Number of peers gossiped in the last 5 days per country",
                &["country", "country_display"],
            )?,
        })
    }

    async fn peer_counts(&mut self, event: &Event) {
        let Some(response) = decode_payload::<PeerCountsResponse>(SERVICE, event) else {
            return;
        };
        let Some(counts) = response.peer_counts else {
            return;
        };

        self.total_nodes_5_days
            .set(gauge_value(counts.total_last_5_days));
        self.reliable_nodes.set(gauge_value(counts.reliable_nodes));
        self.ipv4_nodes_5_days
            .set(gauge_value(counts.ipv4_last_5_days));
        self.ipv6_nodes_5_days
            .set(gauge_value(counts.ipv6_last_5_days));
        for (version, count) in &counts.versions {
            self.peer_version.set(&[version.as_str()], gauge_value(*count));
        }

        self.map_countries(counts.total_last_5_days).await;
    }

    /// One aggregation pass over the addresses behind `total` peers.
    async fn map_countries(&self, total: u64) {
        let Some(geo) = self.ctx.geo.as_deref() else {
            return;
        };
        let Some(bulk) = self.ctx.bulk.as_deref() else {
            debug!(target: "exporter.crawler", "No HTTP client, skipping country mapping");
            return;
        };
        if total == 0 {
            return;
        }

        // Single page sized to the reported total
        let options = IpsAfterTimestampOptions {
            after: chrono::Utc::now().timestamp() - PEER_WINDOW_SECS,
            offset: 0,
            limit: total,
        };
        info!(
            target: "exporter.crawler",
            limit = total,
            "Requesting peer addresses for country mapping"
        );

        let response = match bulk.get_ips_after_timestamp(&options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(target: "exporter.crawler", error = %e, "Failed to fetch peer addresses");
                return;
            }
        };

        let countries = aggregate_countries(geo, &response.ips);
        for country in countries.values() {
            self.country_node_count.set(
                &[country.iso_code.as_str(), country.display_name.as_str()],
                gauge_value(country.count),
            );
        }
        debug!(
            target: "exporter.crawler",
            addresses = response.ips.len(),
            countries = countries.len(),
            "Country mapping complete"
        );
    }
}

#[async_trait]
impl ServiceMetrics for CrawlerMetrics {
    fn service(&self) -> ServiceKind {
        SERVICE
    }

    async fn seed_initial_data(&mut self) {
        self.ctx
            .request(SERVICE, "get_peer_counts", serde_json::json!({}));
    }

    async fn handle_event(&mut self, event: &Event) {
        match event.command.as_str() {
            "get_peer_counts" | "loaded_initial_peers" | "crawl_batch_completed" => {
                self.peer_counts(event).await;
            }
            other => debug!(target: "exporter.crawler", command = other, "Ignoring command"),
        }
    }

    fn on_disconnect(&mut self) {
        self.total_nodes_5_days.unregister();
        self.reliable_nodes.unregister();
        self.ipv4_nodes_5_days.unregister();
        self.ipv6_nodes_5_days.unregister();
        self.peer_version.reset();
        self.country_node_count.reset();
    }
}
