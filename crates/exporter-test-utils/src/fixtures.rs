//! Daemon event fixtures.
//!
//! Builders for the payloads the node pushes, shaped like the real daemon
//! messages (extra fields included where handlers are expected to ignore
//! them). All origins use the [`PREFIX`] network prefix.

use exporter_service::rpc::types::PlotInfo;
use exporter_service::types::{Event, ServiceKind};
use serde_json::{json, Value};

/// Network prefix used by every fixture.
pub const PREFIX: &str = "stai";

/// Event from `service` with a JSON payload.
pub fn event(service: ServiceKind, command: &str, data: Value) -> Event {
    Event::new(service.daemon_name(PREFIX), command, data.to_string())
}

/// Event from `service` with a raw (possibly malformed) payload.
pub fn raw_event(service: ServiceKind, command: &str, data: &str) -> Event {
    Event::new(service.daemon_name(PREFIX), command, data.to_string())
}

/// Crawler `get_peer_counts` response.
pub fn peer_counts(total: u64, ipv4: u64, ipv6: u64, versions: &[(&str, u64)]) -> Event {
    let versions: serde_json::Map<String, Value> = versions
        .iter()
        .map(|(version, count)| ((*version).to_string(), json!(count)))
        .collect();
    event(
        ServiceKind::Crawler,
        "get_peer_counts",
        json!({
            "peer_counts": {
                "total_last_5_days": total,
                "reliable_nodes": total / 2,
                "ipv4_last_5_days": ipv4,
                "ipv6_last_5_days": ipv6,
                "versions": versions
            },
            "success": true
        }),
    )
}

/// Wallet `get_sync_status` response.
pub fn sync_status(synced: bool) -> Event {
    event(
        ServiceKind::Wallet,
        "get_sync_status",
        json!({"synced": synced, "syncing": !synced, "genesis_initialized": true, "success": true}),
    )
}

/// Wallet `get_wallet_balance` response. Amounts are raw JSON numbers so
/// values above `u64::MAX` can be expressed.
pub fn wallet_balance(wallet_id: u32, fingerprint: u64, confirmed: &str) -> Event {
    let data = format!(
        r#"{{"wallet_balance": {{"wallet_id": {wallet_id}, "fingerprint": {fingerprint},
            "wallet_type": 0, "asset_id": null,
            "confirmed_wallet_balance": {confirmed}, "spendable_balance": {confirmed},
            "max_send_amount": {confirmed}, "pending_coin_removal_count": 0,
            "unspent_coin_count": 3, "unconfirmed_wallet_balance": {confirmed}}},
            "success": true}}"#
    );
    Event::new(
        ServiceKind::Wallet.daemon_name(PREFIX),
        "get_wallet_balance",
        data,
    )
}

/// Full node `get_blockchain_state` response.
pub fn blockchain_state(height: u32, synced: bool) -> Event {
    event(
        ServiceKind::FullNode,
        "get_blockchain_state",
        json!({
            "blockchain_state": {
                "difficulty": 1024,
                "mempool_cost": 0,
                "mempool_min_fees": {"cost_5000000": 0.5},
                "mempool_size": 2,
                "mempool_max_total_cost": 550_000_000_000u64,
                "peak": {"height": height, "header_hash": "0xabc"},
                "space": 3_298_534_883_328u64,
                "sub_slot_iters": 147_849_216u64,
                "sync": {"synced": synced, "sync_mode": false, "sync_progress_height": 0}
            },
            "success": true
        }),
    )
}

/// Harvester `farming_info` event.
pub fn farming_info(total_plots: u64, found_proofs: u64, eligible_plots: u64) -> Event {
    event(
        ServiceKind::Harvester,
        "farming_info",
        json!({
            "challenge_hash": "0x00",
            "signage_point": "0x01",
            "total_plots": total_plots,
            "found_proofs": found_proofs,
            "eligible_plots": eligible_plots,
            "time": 0.25
        }),
    )
}

/// One plot listing entry.
pub fn plot(size: u8, file_size: u64, pool: bool) -> PlotInfo {
    PlotInfo {
        size,
        file_size,
        pool_contract_puzzle_hash: pool.then(|| "0xfeed".to_string()),
        filename: format!("plot-k{size}-{file_size}.plot"),
    }
}

/// Harvester `get_plots` response carried over the daemon socket.
pub fn plots_event(plots: &[PlotInfo]) -> Event {
    let plots: Vec<Value> = plots
        .iter()
        .map(|plot| {
            json!({
                "size": plot.size,
                "file_size": plot.file_size,
                "pool_contract_puzzle_hash": plot.pool_contract_puzzle_hash,
                "filename": plot.filename
            })
        })
        .collect();
    event(
        ServiceKind::Harvester,
        "get_plots",
        json!({"plots": plots, "failed_to_open_filenames": [], "not_found_filenames": [], "success": true}),
    )
}
