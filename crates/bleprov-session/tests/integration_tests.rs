//! Integration tests for the provisioning workflow
//!
//! These tests drive the session end to end over mock collaborators:
//! - Full scan → select → send flow including the registry side effect
//! - Discovery deduplication and ordering
//! - The target-device policy gate
//! - Credential validation, delivery failure/retry, and timeouts
//! - Cancellation semantics and stale-outcome suppression
//! - Permission denial

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use bleprov_registry::{DeviceRegistry, ListStore, MemoryListStore};
use bleprov_session::test_utils::{session_fixture, DeliveryScript, DenyAll, MockTransport};
use bleprov_session::{
    DeviceFilter, DeviceId, DeviceRecord, ProvisioningSession, ScanResult, SelectionOutcome,
    SessionConfig, SessionConfigBuilder, SessionEvent, SessionState, WifiCredentials,
};

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait until an event matching the predicate arrives, or panic after a
/// grace period
async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    what: &str,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

fn quick_config() -> SessionConfig {
    SessionConfigBuilder::new()
        .scan_window(Duration::from_millis(200))
        .delivery_timeout(Duration::from_millis(500))
        .build()
}

// ============================================================================
// Full workflow
// ============================================================================

#[tokio::test]
async fn test_happy_path_scan_select_send() {
    init_tracing();
    let transport = MockTransport::new()
        .with_result(ScanResult::new("AA:BB", "ESP32-Kitchen").with_signal_strength(-48));
    let writes = transport.writes.clone();
    let (session, registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    assert_eq!(session.state(), SessionState::AwaitingSelection);

    let outcome = session.select_device(&DeviceId::new("AA:BB")).unwrap();
    assert_eq!(outcome, SelectionOutcome::Eligible);
    assert_eq!(session.state(), SessionState::AwaitingCredentials);

    session
        .submit_credentials(WifiCredentials::new("HomeNet", "hunter22"))
        .unwrap();
    assert_eq!(session.state(), SessionState::Sending);

    let event = wait_for(&mut events, "delivery success", |e| {
        matches!(e, SessionEvent::DeliverySucceeded { .. })
    })
    .await;
    assert_eq!(session.state(), SessionState::Succeeded);

    // The delivered credentials reached the transport
    let written = writes.lock().unwrap().clone();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0.as_str(), "AA:BB");
    assert_eq!(written[0].1.ssid, "HomeNet");

    // The provisioned device joined the registry
    let SessionEvent::DeliverySucceeded { record } = event else {
        unreachable!()
    };
    assert_eq!(record.id.as_str(), "AA:BB");
    assert!(registry.contains(&DeviceId::new("AA:BB")).await);

    let stats = session.stats();
    assert_eq!(stats.scans_started, 1);
    assert_eq!(stats.deliveries_succeeded, 1);
}

#[tokio::test]
async fn test_succeeded_session_is_scan_ready_again() {
    let transport = MockTransport::new().with_result(ScanResult::new("AA:BB", "ESP32-1"));
    let (session, _registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    session.select_device(&DeviceId::new("AA:BB")).unwrap();
    session
        .submit_credentials(WifiCredentials::open("HomeNet"))
        .unwrap();
    wait_for(&mut events, "delivery success", |e| {
        matches!(e, SessionEvent::DeliverySucceeded { .. })
    })
    .await;

    // A finished workflow can start over without an explicit cancel
    session.start_scan().await.unwrap();
    assert_eq!(session.state(), SessionState::Scanning);
    session.cancel();
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_discovery_dedup_last_write_wins_in_first_seen_order() {
    let transport = MockTransport::new().with_results([
        ScanResult::new("X", "ESP32-X").with_signal_strength(-70),
        ScanResult::new("Y", "ESP32-Y").with_signal_strength(-60),
        ScanResult::new("X", "ESP32-X").with_signal_strength(-42),
    ]);
    let (session, _registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    let event = wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;

    // Two distinct devices, X first, carrying the later report's data
    let SessionEvent::ScanCompleted { discovered } = event else {
        unreachable!()
    };
    assert_eq!(discovered, 2);

    let list = session.discovered();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id.as_str(), "X");
    assert_eq!(list[0].signal_strength, Some(-42));
    assert_eq!(list[1].id.as_str(), "Y");

    let stats = session.stats();
    assert_eq!(stats.devices_discovered, 2);
    assert_eq!(stats.duplicates_coalesced, 1);
}

#[tokio::test]
async fn test_empty_scan_returns_to_idle() {
    let (session, _registry) = session_fixture(MockTransport::new(), quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    let event = wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;

    assert!(matches!(event, SessionEvent::ScanCompleted { discovered: 0 }));
    // Zero results is not an error; the session is scan-ready again
    assert_eq!(session.state(), SessionState::Idle);
    session.start_scan().await.unwrap();
    session.cancel();
}

#[tokio::test]
async fn test_discovery_events_arrive_in_report_order() {
    let transport = MockTransport::new()
        .with_results([
            ScanResult::new("A", "ESP32-A"),
            ScanResult::new("B", "ESP32-B"),
        ])
        .with_result_delay(Duration::from_millis(10));
    let (session, _registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();

    let first = wait_for(&mut events, "first discovery", |e| {
        matches!(e, SessionEvent::DeviceDiscovered(_))
    })
    .await;
    let second = wait_for(&mut events, "second discovery", |e| {
        matches!(e, SessionEvent::DeviceDiscovered(_))
    })
    .await;

    let SessionEvent::DeviceDiscovered(first) = first else { unreachable!() };
    let SessionEvent::DeviceDiscovered(second) = second else { unreachable!() };
    assert_eq!(first.id.as_str(), "A");
    assert_eq!(second.id.as_str(), "B");
}

// ============================================================================
// Selection policy gate
// ============================================================================

#[tokio::test]
async fn test_filter_gates_selection() {
    let transport = MockTransport::new().with_results([
        ScanResult::new("AA:BB", "ESP32-1"),
        ScanResult::new("CC:DD", "JBL Speaker"),
    ]);
    let (session, _registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;

    // Non-target device: viewed but the credential step stays locked
    let outcome = session.select_device(&DeviceId::new("CC:DD")).unwrap();
    assert_eq!(outcome, SelectionOutcome::Ineligible);
    assert_eq!(session.state(), SessionState::AwaitingSelection);
    assert!(session.selected().is_none());

    // Unknown device: same, and not an error
    let outcome = session.select_device(&DeviceId::new("ZZ:ZZ")).unwrap();
    assert_eq!(outcome, SelectionOutcome::NotDiscovered);
    assert_eq!(session.state(), SessionState::AwaitingSelection);

    // Target device unlocks credential entry
    let outcome = session.select_device(&DeviceId::new("AA:BB")).unwrap();
    assert_eq!(outcome, SelectionOutcome::Eligible);
    assert_eq!(session.state(), SessionState::AwaitingCredentials);
}

#[tokio::test]
async fn test_custom_filter_is_honored() {
    let transport = MockTransport::new().with_result(ScanResult::new("AA:BB", "SmartPlug-42"));
    let config = SessionConfigBuilder::new()
        .scan_window(Duration::from_millis(200))
        .filter(DeviceFilter::NamePrefix {
            prefix: "SmartPlug-".to_string(),
        })
        .build();
    let (session, _registry) = session_fixture(transport, config).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;

    assert_eq!(
        session.select_device(&DeviceId::new("AA:BB")).unwrap(),
        SelectionOutcome::Eligible
    );
}

// ============================================================================
// Credential validation, failure, retry
// ============================================================================

#[tokio::test]
async fn test_empty_ssid_rejected_state_preserved() {
    let transport = MockTransport::new().with_result(ScanResult::new("AA:BB", "ESP32-1"));
    let (session, _registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    session.select_device(&DeviceId::new("AA:BB")).unwrap();

    let err = session
        .submit_credentials(WifiCredentials::new("", "pw"))
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_SSID");
    assert!(err.is_validation_error());
    assert_eq!(session.state(), SessionState::AwaitingCredentials);
}

#[tokio::test]
async fn test_delivery_failure_then_retry_succeeds() {
    init_tracing();
    let transport = MockTransport::new()
        .with_result(ScanResult::new("AA:BB", "ESP32-1"))
        .with_delivery(DeliveryScript::FailWrite("device rejected write".to_string()));
    let (session, registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    session.select_device(&DeviceId::new("AA:BB")).unwrap();

    session
        .submit_credentials(WifiCredentials::new("HomeNet", "wrong"))
        .unwrap();
    let event = wait_for(&mut events, "delivery failure", |e| {
        matches!(e, SessionEvent::DeliveryFailed { .. })
    })
    .await;
    let SessionEvent::DeliveryFailed { code, .. } = event else {
        unreachable!()
    };
    assert_eq!(code, "DELIVERY_FAILED");
    assert_eq!(session.state(), SessionState::Failed);
    assert!(registry.is_empty().await);

    // Retry with edited credentials from the failed state
    session
        .submit_credentials(WifiCredentials::new("HomeNet", "hunter22"))
        .unwrap();
    wait_for(&mut events, "delivery success", |e| {
        matches!(e, SessionEvent::DeliverySucceeded { .. })
    })
    .await;
    assert_eq!(session.state(), SessionState::Succeeded);
    assert!(registry.contains(&DeviceId::new("AA:BB")).await);

    let stats = session.stats();
    assert_eq!(stats.deliveries_attempted, 2);
    assert_eq!(stats.deliveries_failed, 1);
    assert_eq!(stats.deliveries_succeeded, 1);
}

#[tokio::test]
async fn test_connect_failure_is_terminal_and_retriable() {
    let transport = MockTransport::new()
        .with_result(ScanResult::new("AA:BB", "ESP32-1"))
        .with_delivery(DeliveryScript::FailConnect("out of range".to_string()));
    let (session, _registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    session.select_device(&DeviceId::new("AA:BB")).unwrap();
    session
        .submit_credentials(WifiCredentials::open("HomeNet"))
        .unwrap();

    let event = wait_for(&mut events, "delivery failure", |e| {
        matches!(e, SessionEvent::DeliveryFailed { .. })
    })
    .await;
    let SessionEvent::DeliveryFailed { code, .. } = event else {
        unreachable!()
    };
    assert_eq!(code, "CONNECT_FAILED");
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_hung_delivery_times_out() {
    init_tracing();
    let transport = MockTransport::new()
        .with_result(ScanResult::new("AA:BB", "ESP32-1"))
        .with_delivery(DeliveryScript::Hang);
    let config = SessionConfigBuilder::new()
        .scan_window(Duration::from_millis(200))
        .delivery_timeout(Duration::from_millis(100))
        .build();
    let (session, registry) = session_fixture(transport, config).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    session.select_device(&DeviceId::new("AA:BB")).unwrap();
    session
        .submit_credentials(WifiCredentials::open("HomeNet"))
        .unwrap();

    // The bounded wait produces a definite terminal outcome
    let event = wait_for(&mut events, "delivery timeout", |e| {
        matches!(e, SessionEvent::DeliveryFailed { .. })
    })
    .await;
    let SessionEvent::DeliveryFailed { code, .. } = event else {
        unreachable!()
    };
    assert_eq!(code, "DELIVERY_TIMEOUT");
    assert_eq!(session.state(), SessionState::Failed);
    assert!(registry.is_empty().await);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_during_sending_suppresses_outcome() {
    init_tracing();
    let transport = MockTransport::new()
        .with_result(ScanResult::new("AA:BB", "ESP32-1"))
        .with_write_delay(Duration::from_millis(150));
    let (session, registry) = session_fixture(transport, quick_config()).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    session.select_device(&DeviceId::new("AA:BB")).unwrap();
    session
        .submit_credentials(WifiCredentials::new("HomeNet", "hunter22"))
        .unwrap();
    assert_eq!(session.state(), SessionState::Sending);

    session.cancel();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.selected().is_none());
    assert!(session.discovered().is_empty());

    // Give the abandoned attempt time to have completed, then verify it
    // mutated neither the session nor the registry
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(registry.is_empty().await);

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::DeliverySucceeded { .. }),
            "abandoned delivery must not surface a success"
        );
    }
}

#[tokio::test]
async fn test_cancel_during_scan_discards_results() {
    let transport = MockTransport::new()
        .with_result(ScanResult::new("AA:BB", "ESP32-1"))
        .with_hold_open(true);
    let config = SessionConfigBuilder::new()
        .scan_window(Duration::from_secs(5))
        .build();
    let (session, _registry) = session_fixture(transport, config).await;
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "first discovery", |e| {
        matches!(e, SessionEvent::DeviceDiscovered(_))
    })
    .await;

    session.cancel();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.discovered().is_empty());
    wait_for(&mut events, "cancellation", |e| {
        matches!(e, SessionEvent::Cancelled)
    })
    .await;
}

#[tokio::test]
async fn test_cancel_after_success_does_not_lose_registry_write() {
    init_tracing();
    let store = Arc::new(MemoryListStore::new());

    // Store whose durable writes take a while, widening the window
    // between the success transition and the registry write landing
    struct SlowStore(Arc<MemoryListStore>);
    #[async_trait::async_trait]
    impl ListStore for SlowStore {
        async fn read_list(&self, key: &str) -> bleprov_core::Result<Option<Vec<String>>> {
            self.0.read_list(key).await
        }
        async fn write_list(&self, key: &str, entries: &[String]) -> bleprov_core::Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.write_list(key, entries).await
        }
    }

    let registry = Arc::new(
        DeviceRegistry::open_default(Box::new(SlowStore(store.clone())))
            .await
            .unwrap(),
    );
    let transport = MockTransport::new().with_result(ScanResult::new("AA:BB", "ESP32-1"));
    let session = ProvisioningSession::establish(
        quick_config(),
        Arc::new(transport),
        Arc::clone(&registry),
        &bleprov_session::AlwaysGranted,
    )
    .await
    .unwrap();
    let mut events = session.subscribe();

    session.start_scan().await.unwrap();
    wait_for(&mut events, "scan completion", |e| {
        matches!(e, SessionEvent::ScanCompleted { .. })
    })
    .await;
    session.select_device(&DeviceId::new("AA:BB")).unwrap();
    session
        .submit_credentials(WifiCredentials::new("HomeNet", "hunter22"))
        .unwrap();

    // Cancel the instant the session reports success, while the durable
    // write is still in flight
    wait_for(&mut events, "transition to succeeded", |e| {
        matches!(
            e,
            SessionEvent::StateChanged {
                to: SessionState::Succeeded,
                ..
            }
        )
    })
    .await;
    session.cancel();
    assert_eq!(session.state(), SessionState::Idle);

    // The committed outcome still lands: the success event is emitted and
    // the record survives a restart
    wait_for(&mut events, "delivery success", |e| {
        matches!(e, SessionEvent::DeliverySucceeded { .. })
    })
    .await;
    let reloaded = DeviceRegistry::open_default(Box::new(SlowStore(store)))
        .await
        .unwrap();
    assert!(reloaded.contains(&DeviceId::new("AA:BB")).await);
}

#[tokio::test]
async fn test_double_cancel_from_idle_has_no_effect() {
    let (session, _registry) = session_fixture(MockTransport::new(), quick_config()).await;
    let mut events = session.subscribe();

    session.cancel();
    session.cancel();

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.stats().cancellations, 0);
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn test_denied_access_fails_scans_only() {
    let registry = Arc::new(
        DeviceRegistry::open_default(Box::new(MemoryListStore::new()))
            .await
            .unwrap(),
    );
    let session = ProvisioningSession::establish(
        quick_config(),
        Arc::new(MockTransport::new()),
        Arc::clone(&registry),
        &DenyAll,
    )
    .await
    .unwrap();

    let err = session.start_scan().await.unwrap_err();
    assert_eq!(err.error_code(), "PERMISSION_DENIED");
    assert!(!err.is_retriable());
    assert_eq!(session.state(), SessionState::Idle);

    // The registry is still fully usable without scan access
    registry.add(DeviceRecord::new("AA:BB", "ESP32-1")).await.unwrap();
    assert_eq!(registry.len().await, 1);
}

// ============================================================================
// Registry persistence through a full workflow
// ============================================================================

#[tokio::test]
async fn test_provisioned_device_survives_restart() {
    let store = Arc::new(MemoryListStore::new());

    struct Shared(Arc<MemoryListStore>);
    #[async_trait::async_trait]
    impl ListStore for Shared {
        async fn read_list(&self, key: &str) -> bleprov_core::Result<Option<Vec<String>>> {
            self.0.read_list(key).await
        }
        async fn write_list(&self, key: &str, entries: &[String]) -> bleprov_core::Result<()> {
            self.0.write_list(key, entries).await
        }
    }

    {
        let registry = Arc::new(
            DeviceRegistry::open_default(Box::new(Shared(store.clone())))
                .await
                .unwrap(),
        );
        let transport = MockTransport::new().with_result(ScanResult::new("AA:BB", "ESP32-1"));
        let session = ProvisioningSession::establish(
            quick_config(),
            Arc::new(transport),
            Arc::clone(&registry),
            &bleprov_session::AlwaysGranted,
        )
        .await
        .unwrap();
        let mut events = session.subscribe();

        session.start_scan().await.unwrap();
        wait_for(&mut events, "scan completion", |e| {
            matches!(e, SessionEvent::ScanCompleted { .. })
        })
        .await;
        session.select_device(&DeviceId::new("AA:BB")).unwrap();
        session
            .submit_credentials(WifiCredentials::new("HomeNet", "hunter22"))
            .unwrap();
        wait_for(&mut events, "delivery success", |e| {
            matches!(e, SessionEvent::DeliverySucceeded { .. })
        })
        .await;
    }

    // "Restart": a fresh registry over the same store sees the device
    let reloaded = DeviceRegistry::open_default(Box::new(Shared(store)))
        .await
        .unwrap();
    assert!(reloaded.contains(&DeviceId::new("AA:BB")).await);
}
