//! Harvester metrics: plot inventory and farming lookups.
//!
//! `farming_info` arrives every signage point and carries the current plot
//! total. A full plot listing is only fetched when that total differs from
//! the last listing that was processed successfully. Listings go over the
//! HTTP channel when it is available, since large responses are unreliable
//! on the daemon socket, and over the socket otherwise. At most one socket
//! listing is outstanding at a time.

use super::{decode_payload, gauge_value, ServiceContext, ServiceMetrics};
use crate::errors::ExporterError;
use crate::instruments::{GaugeSet, InstrumentRegistry, LazyCounter, LazyGauge};
use crate::rpc::types::{GetPlotsResponse, PlotInfo};
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

const SERVICE: ServiceKind = ServiceKind::Harvester;

const PLOT_TYPE_OG: &str = "og";
const PLOT_TYPE_POOL: &str = "pool";

#[derive(Debug, Deserialize)]
struct FarmingInfoEvent {
    total_plots: u64,
    #[serde(default)]
    found_proofs: u64,
    #[serde(default)]
    eligible_plots: u64,
    #[serde(default)]
    time: f64,
}

/// Per-k-size totals for one plot type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlotTotals {
    pub count: u64,
    pub file_size: u64,
}

/// Plot totals of one k size, split by type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    pub og: PlotTotals,
    pub pool: PlotTotals,
}

/// Group plots by k size and by pool vs. solo (OG).
#[must_use]
pub fn aggregate_plots(plots: &[PlotInfo]) -> BTreeMap<u8, SizeClass> {
    let mut classes: BTreeMap<u8, SizeClass> = BTreeMap::new();
    for plot in plots {
        let class = classes.entry(plot.size).or_default();
        let totals = if plot.is_pool() {
            &mut class.pool
        } else {
            &mut class.og
        };
        totals.count += 1;
        totals.file_size = totals.file_size.saturating_add(plot.file_size);
    }
    classes
}

/// Harvester handler.
pub struct HarvesterMetrics {
    ctx: ServiceContext,

    /// Plot total of the last listing processed.
    listed_plots: u64,
    /// k sizes published by the last listing.
    published_sizes: BTreeSet<u8>,
    /// A `get_plots` request is queued on the socket and not yet answered.
    listing_pending: bool,

    total_plots: LazyGauge,
    plot_filesize: GaugeSet,
    plot_count: GaugeSet,
    total_found_proofs: LazyCounter,
    last_found_proofs: LazyGauge,
    total_eligible_plots: LazyCounter,
    last_eligible_plots: LazyGauge,
    last_lookup_time: LazyGauge,
}

impl HarvesterMetrics {
    pub fn initialize(
        registry: &InstrumentRegistry,
        ctx: &ServiceContext,
    ) -> Result<Self, ExporterError> {
        Ok(Self {
            ctx: ctx.clone(),
            listed_plots: 0,
            published_sizes: BTreeSet::new(),
            listing_pending: false,
            total_plots: registry.gauge(
                SERVICE,
                "total_plots",
                "Total number of plots on this harvester",
            )?,
            plot_filesize: registry.gauge_set(
                SERVICE,
                "plot_filesize",
                "Total filesize of plots on this harvester, by k size and type",
                &["size", "type"],
            )?,
            plot_count: registry.gauge_set(
                SERVICE,
                "plot_count",
                "Total count of plots on this harvester, by k size and type",
                &["size", "type"],
            )?,
            total_found_proofs: registry.counter(
                SERVICE,
                "total_found_proofs",
                "Counter of proofs found since the exporter started",
            )?,
            last_found_proofs: registry.gauge(
                SERVICE,
                "last_found_proofs",
                "Number of proofs found for the last farming_info event",
            )?,
            total_eligible_plots: registry.counter(
                SERVICE,
                "total_eligible_plots",
                "Counter of eligible plots since the exporter started",
            )?,
            last_eligible_plots: registry.gauge(
                SERVICE,
                "last_eligible_plots",
                "Number of eligible plots for the last farming_info event",
            )?,
            last_lookup_time: registry.gauge(
                SERVICE,
                "last_lookup_time",
                "Lookup time in seconds for the last farming_info event",
            )?,
        })
    }

    /// Fetch a full plot listing.
    async fn refresh_plots(&mut self) {
        let Some(bulk) = self.ctx.bulk.clone() else {
            if self.listing_pending {
                debug!(target: "exporter.harvester", "Plot listing already requested");
                return;
            }
            // Response comes back as a get_plots event
            self.ctx
                .request(SERVICE, "get_plots", serde_json::json!({}));
            self.listing_pending = true;
            return;
        };

        debug!(target: "exporter.harvester", "Requesting plot listing over HTTP");
        match bulk.get_plots().await {
            Ok(plots) => self.publish_plots(&plots),
            Err(e) => warn!(
                target: "exporter.harvester",
                error = %e,
                "Could not get plot information from harvester"
            ),
        }
    }

    async fn farming_info(&mut self, event: &Event) {
        let Some(info) = decode_payload::<FarmingInfoEvent>(SERVICE, event) else {
            return;
        };

        self.total_plots.set(gauge_value(info.total_plots));
        debug!(
            target: "exporter.harvester",
            total_plots = info.total_plots,
            listed_plots = self.listed_plots,
            "Farming info"
        );
        if info.total_plots != self.listed_plots {
            self.refresh_plots().await;
        }

        self.total_found_proofs.add(gauge_value(info.found_proofs));
        self.last_found_proofs.set(gauge_value(info.found_proofs));
        self.total_eligible_plots
            .add(gauge_value(info.eligible_plots));
        self.last_eligible_plots
            .set(gauge_value(info.eligible_plots));
        self.last_lookup_time.set(info.time);
    }

    fn publish_plots(&mut self, plots: &GetPlotsResponse) {
        let classes = aggregate_plots(&plots.plots);

        for (size, class) in &classes {
            let size = size.to_string();
            for (plot_type, totals) in [(PLOT_TYPE_OG, class.og), (PLOT_TYPE_POOL, class.pool)] {
                let labels = [size.as_str(), plot_type];
                self.plot_count.set(&labels, gauge_value(totals.count));
                self.plot_filesize
                    .set(&labels, gauge_value(totals.file_size));
            }
        }

        // Sizes that disappeared from the farm
        let current: BTreeSet<u8> = classes.keys().copied().collect();
        for size in self.published_sizes.difference(&current) {
            let size = size.to_string();
            for plot_type in [PLOT_TYPE_OG, PLOT_TYPE_POOL] {
                self.plot_count.remove(&[size.as_str(), plot_type]);
                self.plot_filesize.remove(&[size.as_str(), plot_type]);
            }
        }
        self.published_sizes = current;

        let total = plots.plots.len() as u64;
        self.total_plots.set(gauge_value(total));
        self.listed_plots = total;
    }
}

#[async_trait]
impl ServiceMetrics for HarvesterMetrics {
    fn service(&self) -> ServiceKind {
        SERVICE
    }

    async fn seed_initial_data(&mut self) {
        self.refresh_plots().await;
    }

    async fn handle_event(&mut self, event: &Event) {
        match event.command.as_str() {
            "farming_info" => self.farming_info(event).await,
            "get_plots" => {
                self.listing_pending = false;
                if let Some(plots) = decode_payload::<GetPlotsResponse>(SERVICE, event) {
                    self.publish_plots(&plots);
                }
            }
            other => debug!(target: "exporter.harvester", command = other, "Ignoring command"),
        }
    }

    fn on_disconnect(&mut self) {
        self.total_plots.unregister();
        self.plot_filesize.reset();
        self.plot_count.reset();
        self.published_sizes.clear();
        self.listing_pending = false;
        self.last_found_proofs.unregister();
        self.last_eligible_plots.unregister();
        self.last_lookup_time.unregister();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::rpc::BulkFetcher;
    use std::sync::Arc;

    fn plot(size: u8, file_size: u64, pool: bool) -> PlotInfo {
        PlotInfo {
            size,
            file_size,
            pool_contract_puzzle_hash: pool.then(|| "0xfeed".to_string()),
            filename: String::new(),
        }
    }

    fn farming_info(total_plots: u64) -> Event {
        event(
            "stai_harvester",
            "farming_info",
            serde_json::json!({
                "challenge_hash": "0x00",
                "total_plots": total_plots,
                "found_proofs": 1,
                "eligible_plots": 3,
                "time": 0.25
            }),
        )
    }

    #[test]
    fn test_aggregate_by_size_and_type() {
        let classes = aggregate_plots(&[
            plot(32, 100, false),
            plot(32, 101, false),
            plot(32, 102, true),
            plot(33, 200, true),
        ]);

        let k32 = classes.get(&32).unwrap();
        assert_eq!(k32.og, PlotTotals { count: 2, file_size: 201 });
        assert_eq!(k32.pool, PlotTotals { count: 1, file_size: 102 });
        let k33 = classes.get(&33).unwrap();
        assert_eq!(k33.og, PlotTotals::default());
        assert_eq!(k33.pool.count, 1);
    }

    fn setup(bulk: Option<Arc<StaticBulk>>) -> (InstrumentRegistry, Arc<RecordingRequester>, HarvesterMetrics) {
        let registry = InstrumentRegistry::new("stai");
        let requester = Arc::new(RecordingRequester::default());
        let mut ctx = context(&requester);
        if let Some(bulk) = bulk {
            ctx = ctx.with_bulk(bulk as Arc<dyn BulkFetcher>);
        }
        let handler = HarvesterMetrics::initialize(&registry, &ctx).unwrap();
        (registry, requester, handler)
    }

    #[tokio::test]
    async fn test_seed_fetches_listing_over_http() {
        let bulk = Arc::new(StaticBulk {
            plots: GetPlotsResponse {
                plots: vec![plot(32, 100, false), plot(32, 100, true)],
            },
            ..StaticBulk::default()
        });
        let (registry, requester, mut handler) = setup(Some(Arc::clone(&bulk)));

        handler.seed_initial_data().await;

        assert_eq!(*bulk.plot_requests.lock().unwrap(), 1);
        assert!(requester.commands().is_empty());
        assert_eq!(handler.plot_count.value(&["32", "og"]), Some(1.0));
        assert_eq!(handler.plot_count.value(&["32", "pool"]), Some(1.0));
        assert!(registry.export().contains("stai_harvester_total_plots 2"));
    }

    #[tokio::test]
    async fn test_seed_falls_back_to_socket() {
        let (_registry, requester, mut handler) = setup(None);
        handler.seed_initial_data().await;
        assert_eq!(requester.commands(), ["get_plots"]);
    }

    #[tokio::test]
    async fn test_listing_only_refetched_on_change() {
        let bulk = Arc::new(StaticBulk {
            plots: GetPlotsResponse {
                plots: vec![plot(32, 100, false), plot(32, 100, false)],
            },
            ..StaticBulk::default()
        });
        let (registry, _requester, mut handler) = setup(Some(Arc::clone(&bulk)));

        handler.handle_event(&farming_info(2)).await;
        handler.handle_event(&farming_info(2)).await;
        handler.handle_event(&farming_info(2)).await;

        assert_eq!(*bulk.plot_requests.lock().unwrap(), 1);
        let export = registry.export();
        assert!(export.contains("stai_harvester_total_found_proofs 3"));
        assert!(export.contains("stai_harvester_total_eligible_plots 9"));
        assert!(export.contains("stai_harvester_last_eligible_plots 3"));
        assert!(export.contains("stai_harvester_last_lookup_time 0.25"));
    }

    #[tokio::test]
    async fn test_failed_listing_retried_next_event() {
        let bulk = Arc::new(StaticBulk {
            fail: true,
            ..StaticBulk::default()
        });
        let (registry, _requester, mut handler) = setup(Some(Arc::clone(&bulk)));

        handler.handle_event(&farming_info(5)).await;
        handler.handle_event(&farming_info(5)).await;

        // Cached total only moves on success
        assert_eq!(*bulk.plot_requests.lock().unwrap(), 2);
        assert!(registry.export().contains("stai_harvester_total_plots 5"));
    }

    #[tokio::test]
    async fn test_socket_listing_and_vanished_sizes() {
        let (_registry, _requester, mut handler) = setup(None);
        let listing = |plots: serde_json::Value| {
            event("stai_harvester", "get_plots", serde_json::json!({ "plots": plots }))
        };

        handler
            .handle_event(&listing(serde_json::json!([
                {"size": 32, "file_size": 10},
                {"size": 33, "file_size": 20, "pool_contract_puzzle_hash": "0xab"}
            ])))
            .await;
        assert_eq!(handler.plot_filesize.value(&["33", "pool"]), Some(20.0));

        handler
            .handle_event(&listing(serde_json::json!([{"size": 32, "file_size": 10}])))
            .await;
        assert_eq!(handler.plot_filesize.value(&["33", "pool"]), None);
        assert_eq!(handler.plot_filesize.value(&["32", "og"]), Some(10.0));
    }

    #[tokio::test]
    async fn test_one_socket_listing_outstanding_at_a_time() {
        let (_registry, requester, mut handler) = setup(None);

        handler.handle_event(&farming_info(4)).await;
        handler.handle_event(&farming_info(4)).await;
        handler.handle_event(&farming_info(5)).await;
        assert_eq!(requester.commands(), ["get_plots"]);

        // Any answer, even an undecodable one, frees the slot
        handler
            .handle_event(&event(
                "stai_harvester",
                "get_plots",
                serde_json::json!({"plots": "unavailable"}),
            ))
            .await;
        handler.handle_event(&farming_info(5)).await;
        assert_eq!(requester.commands(), ["get_plots", "get_plots"]);

        // A new session starts with nothing outstanding
        handler.on_disconnect();
        handler.seed_initial_data().await;
        assert_eq!(requester.commands(), ["get_plots", "get_plots", "get_plots"]);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_counters() {
        let (registry, _requester, mut handler) = setup(None);
        handler.handle_event(&farming_info(0)).await;

        handler.on_disconnect();

        let export = registry.export();
        assert!(!export.contains("stai_harvester_total_plots"));
        assert!(!export.contains("stai_harvester_last_found_proofs"));
        assert!(!export.contains("stai_harvester_last_lookup_time"));
        assert!(export.contains("stai_harvester_total_found_proofs 1"));
    }
}
