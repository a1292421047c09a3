//! Full node metrics: chain state, mempool, peers, blocks and signage points.

use super::{decode_payload, gauge_value, ServiceContext, ServiceMetrics};
use crate::errors::ExporterError;
use crate::instruments::{CounterSet, GaugeSet, InstrumentRegistry, LazyCounter, LazyGauge};
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const SERVICE: ServiceKind = ServiceKind::FullNode;

/// Peer node types as reported by `get_connections`.
const NODE_TYPES: [(u8, &str); 7] = [
    (1, "full_node"),
    (2, "harvester"),
    (3, "farmer"),
    (4, "timelord"),
    (5, "introducer"),
    (6, "wallet"),
    (7, "data_layer"),
];

#[derive(Debug, Deserialize)]
struct BlockchainStateResponse {
    blockchain_state: Option<BlockchainState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockchainState {
    difficulty: u64,
    mempool_cost: u64,
    mempool_min_fees: Option<MempoolMinFees>,
    mempool_size: u64,
    mempool_max_total_cost: u64,
    peak: Option<Peak>,
    space: u128,
    sub_slot_iters: u64,
    sync: SyncState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MempoolMinFees {
    cost_5000000: f64,
}

#[derive(Debug, Deserialize)]
struct Peak {
    height: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncState {
    synced: bool,
    sync_mode: bool,
}

#[derive(Debug, Deserialize)]
struct ConnectionsResponse {
    #[serde(default)]
    connections: Vec<Connection>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(rename = "type")]
    node_type: u8,
}

#[derive(Debug, Deserialize)]
struct BlockEvent {
    k_size: u8,
    #[serde(default)]
    transaction_block: bool,
    #[serde(default)]
    block_cost: Option<u64>,
    #[serde(default)]
    block_fees: Option<u64>,
    #[serde(default)]
    transaction_generator_size_bytes: Option<u64>,
    #[serde(default)]
    transaction_generator_ref_list: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct SignagePointEvent {
    broadcast_farmer: BroadcastFarmer,
}

#[derive(Debug, Deserialize)]
struct BroadcastFarmer {
    signage_point_index: u8,
}

#[derive(Debug, Deserialize)]
struct BlockCountMetricsResponse {
    metrics: Option<BlockCountMetrics>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockCountMetrics {
    compact_blocks: u64,
    uncompact_blocks: u64,
    hint_count: u64,
}

/// Full node handler.
pub struct FullNodeMetrics {
    ctx: ServiceContext,

    // Blockchain state
    difficulty: LazyGauge,
    mempool_cost: LazyGauge,
    mempool_min_fee: LazyGauge,
    mempool_size: LazyGauge,
    mempool_max_total_cost: LazyGauge,
    netspace_mib: LazyGauge,
    node_height: LazyGauge,
    node_height_synced: LazyGauge,
    sub_slot_iters: LazyGauge,
    synced: LazyGauge,
    sync_mode: LazyGauge,

    connection_count: GaugeSet,

    // Blocks
    k_size_total: CounterSet,
    block_cost: LazyGauge,
    block_fees: LazyGauge,
    block_generator_size: LazyGauge,
    block_generator_ref_list_size: LazyGauge,

    // Signage points
    total_signage_points: LazyCounter,
    current_signage_point: LazyGauge,

    // Block counts
    compact_blocks: LazyGauge,
    uncompact_blocks: LazyGauge,
    hint_count: LazyGauge,
}

impl FullNodeMetrics {
    pub fn initialize(
        registry: &InstrumentRegistry,
        ctx: &ServiceContext,
    ) -> Result<Self, ExporterError> {
        let gauge = |name: &str, help: &str| registry.gauge(SERVICE, name, help);

        Ok(Self {
            ctx: ctx.clone(),
            difficulty: gauge("difficulty", "Current network difficulty")?,
            mempool_cost: gauge("mempool_cost", "Current mempool size in cost")?,
            mempool_min_fee: gauge(
                "mempool_min_fee",
                "Minimum fee to get into the mempool, in fee per cost, for a spend with cost 5000000",
            )?,
            mempool_size: gauge("mempool_size", "Number of spends in the mempool")?,
            mempool_max_total_cost: gauge(
                "mempool_max_total_cost",
                "Maximum cost the mempool can hold",
            )?,
            netspace_mib: gauge("netspace_mib", "Estimated netspace in MiB")?,
            node_height: gauge("node_height", "Height of the peak known to this node")?,
            node_height_synced: gauge(
                "node_height_synced",
                "Height of the peak, only reported while the node is synced",
            )?,
            sub_slot_iters: gauge("sub_slot_iters", "Current sub slot iterations")?,
            synced: gauge("synced", "Whether the node is synced (1) or not (0)")?,
            sync_mode: gauge("sync_mode", "Whether the node is in sync mode (1) or not (0)")?,
            connection_count: registry.gauge_set(
                SERVICE,
                "connection_count",
                "Number of active connections by peer node type",
                &["type"],
            )?,
            k_size_total: registry.counter_set(
                SERVICE,
                "k_size_total",
                "Counter of winning plot k sizes since the exporter started",
                &["size"],
            )?,
            block_cost: gauge("block_cost", "Cost of the last transaction block")?,
            block_fees: gauge("block_fees", "Fees of the last transaction block")?,
            block_generator_size: gauge(
                "block_generator_size",
                "Generator size in bytes of the last transaction block",
            )?,
            block_generator_ref_list_size: gauge(
                "block_generator_ref_list_size",
                "Number of generator references in the last transaction block",
            )?,
            total_signage_points: registry.counter(
                SERVICE,
                "total_signage_points",
                "Counter of signage points seen since the exporter started",
            )?,
            current_signage_point: gauge(
                "current_signage_point",
                "Index of the most recent signage point",
            )?,
            compact_blocks: gauge("compact_blocks", "Number of fully compact blocks")?,
            uncompact_blocks: gauge("uncompact_blocks", "Number of uncompact blocks")?,
            hint_count: gauge("hint_count", "Number of hints in the node database")?,
        })
    }

    fn request(&self, command: &str) {
        self.ctx.request(SERVICE, command, serde_json::json!({}));
    }

    fn blockchain_state(&mut self, event: &Event) {
        let Some(response) = decode_payload::<BlockchainStateResponse>(SERVICE, event) else {
            return;
        };
        let Some(state) = response.blockchain_state else {
            return;
        };

        self.difficulty.set(gauge_value(state.difficulty));
        self.mempool_cost.set(gauge_value(state.mempool_cost));
        if let Some(fees) = state.mempool_min_fees {
            self.mempool_min_fee.set(fees.cost_5000000);
        }
        self.mempool_size.set(gauge_value(state.mempool_size));
        self.mempool_max_total_cost
            .set(gauge_value(state.mempool_max_total_cost));
        self.netspace_mib.set(bytes_to_mib(state.space));
        self.sub_slot_iters.set(gauge_value(state.sub_slot_iters));
        self.synced.set(flag(state.sync.synced));
        self.sync_mode.set(flag(state.sync.sync_mode));

        if let Some(peak) = state.peak {
            self.node_height.set(f64::from(peak.height));
            if state.sync.synced {
                self.node_height_synced.set(f64::from(peak.height));
            }
        }
    }

    fn connections(&mut self, event: &Event) {
        let Some(response) = decode_payload::<ConnectionsResponse>(SERVICE, event) else {
            return;
        };

        for (node_type, label) in NODE_TYPES {
            let count = response
                .connections
                .iter()
                .filter(|c| c.node_type == node_type)
                .count();
            self.connection_count
                .set(&[label], gauge_value(count as u64));
        }
    }

    fn block(&mut self, event: &Event) {
        let Some(block) = decode_payload::<BlockEvent>(SERVICE, event) else {
            return;
        };

        let k_size = block.k_size.to_string();
        self.k_size_total.increment(&[k_size.as_str()], 1.0);

        if block.transaction_block {
            if let Some(cost) = block.block_cost {
                self.block_cost.set(gauge_value(cost));
            }
            if let Some(fees) = block.block_fees {
                self.block_fees.set(gauge_value(fees));
            }
            if let Some(size) = block.transaction_generator_size_bytes {
                self.block_generator_size.set(gauge_value(size));
            }
            self.block_generator_ref_list_size
                .set(gauge_value(block.transaction_generator_ref_list.len() as u64));
        }

        // A new block moves the chain state along
        self.request("get_blockchain_state");
    }

    fn signage_point(&mut self, event: &Event) {
        let Some(sp) = decode_payload::<SignagePointEvent>(SERVICE, event) else {
            return;
        };

        self.total_signage_points.add(1.0);
        self.current_signage_point
            .set(f64::from(sp.broadcast_farmer.signage_point_index));
    }

    fn block_count_metrics(&mut self, event: &Event) {
        let Some(response) = decode_payload::<BlockCountMetricsResponse>(SERVICE, event) else {
            return;
        };
        let Some(metrics) = response.metrics else {
            return;
        };

        self.compact_blocks.set(gauge_value(metrics.compact_blocks));
        self.uncompact_blocks
            .set(gauge_value(metrics.uncompact_blocks));
        self.hint_count.set(gauge_value(metrics.hint_count));
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn bytes_to_mib(bytes: u128) -> f64 {
    (bytes / (1024 * 1024)) as f64
}

#[async_trait]
impl ServiceMetrics for FullNodeMetrics {
    fn service(&self) -> ServiceKind {
        SERVICE
    }

    async fn seed_initial_data(&mut self) {
        self.request("get_blockchain_state");
        self.request("get_connections");
        self.request("get_block_count_metrics");
    }

    async fn handle_event(&mut self, event: &Event) {
        match event.command.as_str() {
            "get_blockchain_state" => self.blockchain_state(event),
            "get_connections" => self.connections(event),
            "block" => self.block(event),
            "signage_point" => self.signage_point(event),
            "get_block_count_metrics" => self.block_count_metrics(event),
            other => debug!(target: "exporter.full_node", command = other, "Ignoring command"),
        }
    }

    fn on_disconnect(&mut self) {
        for gauge in [
            &mut self.difficulty,
            &mut self.mempool_cost,
            &mut self.mempool_min_fee,
            &mut self.mempool_size,
            &mut self.mempool_max_total_cost,
            &mut self.netspace_mib,
            &mut self.node_height,
            &mut self.node_height_synced,
            &mut self.sub_slot_iters,
            &mut self.synced,
            &mut self.sync_mode,
            &mut self.block_cost,
            &mut self.block_fees,
            &mut self.block_generator_size,
            &mut self.block_generator_ref_list_size,
            &mut self.current_signage_point,
            &mut self.compact_blocks,
            &mut self.uncompact_blocks,
            &mut self.hint_count,
        ] {
            gauge.unregister();
        }
        self.connection_count.reset();
    }
}
