//! Wallet metrics: sync status and per-wallet balances.
//!
//! Balances are 128-bit on the wire. Amounts that do not fit in a `u64` are
//! never published; the gauge keeps its previous value for that wallet.

use super::{decode_payload, gauge_value, ServiceContext, ServiceMetrics};
use crate::errors::ExporterError;
use crate::instruments::{GaugeSet, InstrumentRegistry, LazyGauge};
use crate::types::{Event, ServiceKind};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const SERVICE: ServiceKind = ServiceKind::Wallet;

const WALLET_LABELS: [&str; 4] = ["fingerprint", "wallet_id", "wallet_type", "asset_id"];

#[derive(Debug, Deserialize)]
struct CoinAddedEvent {
    wallet_id: u32,
}

#[derive(Debug, Deserialize)]
struct SyncStatusResponse {
    #[serde(default)]
    synced: bool,
}

#[derive(Debug, Deserialize)]
struct WalletsResponse {
    #[serde(default)]
    wallets: Vec<WalletInfo>,
}

#[derive(Debug, Deserialize)]
struct WalletInfo {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct WalletBalanceResponse {
    wallet_balance: Option<WalletBalance>,
}

#[derive(Debug, Deserialize)]
struct WalletBalance {
    wallet_id: u32,
    #[serde(default)]
    fingerprint: u64,
    #[serde(default)]
    wallet_type: Option<u8>,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    confirmed_wallet_balance: u128,
    #[serde(default)]
    spendable_balance: u128,
    #[serde(default)]
    max_send_amount: u128,
    #[serde(default)]
    pending_coin_removal_count: u64,
    #[serde(default)]
    unspent_coin_count: u64,
}

/// Gauge value of an on-chain amount, or `None` when it exceeds `u64`.
fn amount_value(amount: u128) -> Option<f64> {
    u64::try_from(amount).ok().map(gauge_value)
}

/// Wallet handler.
pub struct WalletMetrics {
    ctx: ServiceContext,
    synced: LazyGauge,
    confirmed_balance: GaugeSet,
    spendable_balance: GaugeSet,
    max_send_amount: GaugeSet,
    pending_coin_removal_count: GaugeSet,
    unspent_coin_count: GaugeSet,
}

impl WalletMetrics {
    pub fn initialize(
        registry: &InstrumentRegistry,
        ctx: &ServiceContext,
    ) -> Result<Self, ExporterError> {
        let balance_set =
            |name: &str, help: &str| registry.gauge_set(SERVICE, name, help, &WALLET_LABELS);

        Ok(Self {
            ctx: ctx.clone(),
            synced: registry.gauge(SERVICE, "synced", "Whether the wallet is synced (1) or not (0)")?,
            confirmed_balance: balance_set("confirmed_balance", "Confirmed balance in mojos")?,
            spendable_balance: balance_set("spendable_balance", "Spendable balance in mojos")?,
            max_send_amount: balance_set(
                "max_send_amount",
                "Largest amount that can be sent in a single transaction",
            )?,
            pending_coin_removal_count: balance_set(
                "pending_coin_removal_count",
                "Number of coins pending removal",
            )?,
            unspent_coin_count: balance_set("unspent_coin_count", "Number of unspent coins")?,
        })
    }

    fn request_balance(&self, wallet_id: u32) {
        self.ctx.request(
            SERVICE,
            "get_wallet_balance",
            serde_json::json!({ "wallet_id": wallet_id }),
        );
    }

    fn request_sync_status(&self) {
        self.ctx
            .request(SERVICE, "get_sync_status", serde_json::json!({}));
    }

    fn coin_added(&self, event: &Event) {
        let Some(coin) = decode_payload::<CoinAddedEvent>(SERVICE, event) else {
            return;
        };
        self.request_balance(coin.wallet_id);
        self.request_sync_status();
    }

    fn sync_status(&mut self, event: &Event) {
        let Some(status) = decode_payload::<SyncStatusResponse>(SERVICE, event) else {
            return;
        };
        self.synced.set(if status.synced { 1.0 } else { 0.0 });
    }

    fn wallets(&self, event: &Event) {
        let Some(response) = decode_payload::<WalletsResponse>(SERVICE, event) else {
            return;
        };
        for wallet in &response.wallets {
            self.request_balance(wallet.id);
        }
    }

    fn wallet_balance(&self, event: &Event) {
        let Some(response) = decode_payload::<WalletBalanceResponse>(SERVICE, event) else {
            return;
        };
        let Some(balance) = response.wallet_balance else {
            return;
        };

        let fingerprint = balance.fingerprint.to_string();
        let wallet_id = balance.wallet_id.to_string();
        let wallet_type = balance
            .wallet_type
            .map(|t| t.to_string())
            .unwrap_or_default();
        let asset_id = balance.asset_id.unwrap_or_default();
        let labels = [
            fingerprint.as_str(),
            wallet_id.as_str(),
            wallet_type.as_str(),
            asset_id.as_str(),
        ];

        for (set, amount, name) in [
            (
                &self.confirmed_balance,
                balance.confirmed_wallet_balance,
                "confirmed_balance",
            ),
            (
                &self.spendable_balance,
                balance.spendable_balance,
                "spendable_balance",
            ),
            (
                &self.max_send_amount,
                balance.max_send_amount,
                "max_send_amount",
            ),
        ] {
            match amount_value(amount) {
                Some(value) => set.set(&labels, value),
                None => debug!(
                    target: "exporter.wallet",
                    wallet_id = %wallet_id,
                    amount = name,
                    "Skipping amount outside the u64 range"
                ),
            }
        }

        self.pending_coin_removal_count
            .set(&labels, gauge_value(balance.pending_coin_removal_count));
        self.unspent_coin_count
            .set(&labels, gauge_value(balance.unspent_coin_count));
    }
}

#[async_trait]
impl ServiceMetrics for WalletMetrics {
    fn service(&self) -> ServiceKind {
        SERVICE
    }

    async fn seed_initial_data(&mut self) {
        self.ctx
            .request(SERVICE, "get_wallets", serde_json::json!({}));
        self.request_sync_status();
    }

    async fn handle_event(&mut self, event: &Event) {
        match event.command.as_str() {
            "coin_added" => self.coin_added(event),
            "sync_changed" => self.request_sync_status(),
            "get_sync_status" => self.sync_status(event),
            "get_wallet_balance" => self.wallet_balance(event),
            "get_wallets" => self.wallets(event),
            other => debug!(target: "exporter.wallet", command = other, "Ignoring command"),
        }
    }

    fn on_disconnect(&mut self) {
        self.synced.unregister();
        self.confirmed_balance.reset();
        self.spendable_balance.reset();
        self.max_send_amount.reset();
        self.pending_coin_removal_count.reset();
        self.unspent_coin_count.reset();
    }
}
