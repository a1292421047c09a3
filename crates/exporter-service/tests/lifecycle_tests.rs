//! Connection lifecycle integration tests.
//!
//! Runs the real lifecycle loop and handlers against a scripted daemon
//! connector. Time is paused so reconnect delays elapse instantly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use exporter_service::dispatch::EventDispatcher;
use exporter_service::errors::ExporterError;
use exporter_service::instruments::InstrumentRegistry;
use exporter_service::lifecycle::ConnectionLifecycle;
use exporter_service::observability::HealthState;
use exporter_service::rpc::daemon::DaemonRequester;
use exporter_service::rpc::{DaemonConnector, RpcRequester};
use exporter_service::services::{initialize_all, ServiceContext};
use exporter_test_utils::fixtures::{blockchain_state, sync_status, PREFIX};
use exporter_test_utils::{assert_absent, assert_sample, MockConnector, SessionScript};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Subscriptions plus every seed request (no HTTP channel configured).
const OPENING_SENDS: usize = 2 + 3 + 2 + 1 + 1;

struct Running {
    registry: Arc<InstrumentRegistry>,
    health: Arc<HealthState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ExporterError>>,
}

fn start(connector: &Arc<MockConnector>) -> Running {
    let registry = Arc::new(InstrumentRegistry::new(PREFIX));
    let health = Arc::new(HealthState::new());
    let (requester, outbound) = DaemonRequester::channel(PREFIX);
    let ctx = ServiceContext::new(Arc::new(requester) as Arc<dyn RpcRequester>);
    let handlers = initialize_all(&registry, &ctx).unwrap();

    let lifecycle = ConnectionLifecycle::new(
        Arc::clone(connector) as Arc<dyn DaemonConnector>,
        EventDispatcher::with_handlers(PREFIX, handlers),
        outbound,
        Arc::clone(&health),
        PREFIX,
        Duration::from_secs(5),
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn(lifecycle.run(cancel.clone()));

    Running {
        registry,
        health,
        cancel,
        task,
    }
}

/// Polls `condition` for up to a minute of paused time, enough for several
/// reconnect intervals.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..6000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_failure_is_fatal() {
    let connector = Arc::new(MockConnector::new());
    let running = start(&connector);

    let result = running.task.await.unwrap();

    assert!(matches!(result, Err(ExporterError::Transport(_))));
    assert_eq!(connector.attempts(), 1);
    assert!(!running.health.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_subscribes_before_seeding() {
    let connector = Arc::new(MockConnector::new().then_session(SessionScript::new()));
    let running = start(&connector);

    wait_for(|| connector.commands_on(1).len() == OPENING_SENDS).await;

    let commands = connector.commands_on(1);
    assert_eq!(commands.get(..2).unwrap(), ["register_service", "register_service"]);
    assert_eq!(
        commands.get(2..).unwrap(),
        [
            "get_blockchain_state",
            "get_connections",
            "get_block_count_metrics",
            "get_wallets",
            "get_sync_status",
            "get_peer_counts",
            "get_plots",
        ]
    );
    let destinations: Vec<_> = connector
        .sent()
        .into_iter()
        .map(|sent| sent.request.destination)
        .collect();
    assert_eq!(destinations.first().unwrap(), "daemon");
    assert_eq!(destinations.get(2).unwrap(), "stai_full_node");
    assert!(running.health.is_ready());

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
    assert!(!running.health.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_clears_state_and_reconnect_reseeds() {
    let connector = Arc::new(
        MockConnector::new()
            .then_session(
                SessionScript::new()
                    .with_event(sync_status(true))
                    .with_event(blockchain_state(77, true))
                    .close_after_sends(OPENING_SENDS),
            )
            .then_refuse()
            .then_session(SessionScript::new()),
    );
    let running = start(&connector);

    wait_for(|| connector.commands_on(2).len() == OPENING_SENDS).await;

    // Same subscription and seed sequence on the new session
    assert_eq!(connector.commands_on(2), connector.commands_on(1));
    assert_eq!(connector.attempts(), 3);
    assert!(running.health.is_ready());

    // Values from the first session are gone until the node answers again
    let export = running.registry.export();
    assert_absent(&export, "stai_wallet_synced");
    assert_absent(&export, "stai_full_node_node_height");

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_first_session_values_exported_while_connected() {
    let connector = Arc::new(
        MockConnector::new().then_session(
            SessionScript::new()
                .with_event(sync_status(true))
                .with_event(blockchain_state(77, true)),
        ),
    );
    let running = start(&connector);
    let registry = Arc::clone(&running.registry);

    wait_for(|| registry.export().contains("stai_full_node_node_height ")).await;

    let export = registry.export();
    assert_sample(&export, "stai_wallet_synced", 1.0);
    assert_sample(&export, "stai_full_node_node_height", 77.0);

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_requests_queued_for_dead_session_are_discarded() {
    // Closes right after subscribing, racing the seed requests
    let connector = Arc::new(
        MockConnector::new()
            .then_session(SessionScript::new().close_after_sends(2))
            .then_session(SessionScript::new()),
    );
    let running = start(&connector);

    wait_for(|| connector.commands_on(2).len() >= OPENING_SENDS).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(connector.commands_on(2).len(), OPENING_SENDS);

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_reconnect_backoff() {
    let connector = Arc::new(
        MockConnector::new().then_session(SessionScript::new().close_after_sends(OPENING_SENDS)),
    );
    let running = start(&connector);

    // First session is done and at least one retry was refused
    wait_for(|| connector.attempts() >= 2).await;
    assert!(!running.health.is_ready());

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
    assert!(!running.health.is_ready());
}
