use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hublink_scanner::commands;
use hublink_scanner::config::AppConfig;
use hublink_scanner::core::bluetooth::{
    ConnectionStatus, DisconnectReason, LinkLoss, SimulatedAdapter, SimulatedDevice,
    UUID_HUBLINK_SERVICE,
};
use hublink_scanner::logging::Severity;
use hublink_scanner::{AppState, ErrorKind};
use uuid::Uuid;

const NODE_1: &str = "AA:BB:CC:DD:EE:01";
const NODE_2: &str = "AA:BB:CC:DD:EE:02";

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "hublink-session-{}-{}.json",
        std::process::id(),
        name
    ))
}

fn test_config(name: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.connection.connect_timeout_ms = 300;
    config.connection.retry_delay_ms = 10;
    config.connection.read_timeout_ms = 200;
    config.connection.write_timeout_ms = 200;
    config.connection.keepalive_interval_ms = 50;
    config.commands.path = temp_path(name);
    config
}

async fn start(devices: Vec<SimulatedDevice>, config: AppConfig) -> (AppState, SimulatedAdapter) {
    let adapter = SimulatedAdapter::new();
    for device in devices {
        adapter.add_device(device);
    }
    let state = AppState::with_adapter(Some(Arc::new(adapter.clone())), config)
        .await
        .unwrap();
    (state, adapter)
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Scans until every address in `addresses` is registered.
async fn discover(state: &AppState, addresses: &[&str]) {
    let manager = &state.bluetooth_manager;
    manager
        .start_scan(None, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let found = wait_until(|| addresses.iter().all(|a| manager.device(a).is_ok())).await;
    assert!(found, "devices were not discovered");
}

fn node_1() -> SimulatedDevice {
    SimulatedDevice::new(NODE_1, "Hublink-Node-1", -52).with_status("battery=87")
}

#[tokio::test]
async fn connect_reads_status_then_keepalive_detects_timeout() {
    let (state, adapter) = start(vec![node_1()], test_config("scenario")).await;
    discover(&state, &[NODE_1]).await;

    let record = commands::connect_to_device(&state, NODE_1)
        .await
        .into_result()
        .unwrap();
    assert_eq!(record.connection_status, ConnectionStatus::Connected);
    assert_eq!(record.node_data_raw.as_deref(), Some("battery=87"));
    assert_eq!(record.rssi, -52);
    assert_eq!(adapter.read_count(NODE_1), 1);
    assert!(!state.bluetooth_manager.scanner_status().is_scanning);
    assert!(!adapter.scanned_during_connect());

    adapter.drop_link(NODE_1, LinkLoss::Timeout);
    let manager = &state.bluetooth_manager;
    assert!(
        wait_until(|| {
            manager
                .device(NODE_1)
                .is_ok_and(|r| r.connection_status == ConnectionStatus::Discovered)
        })
        .await
    );
    let record = manager.device(NODE_1).unwrap();
    assert_eq!(record.disconnect_reason, DisconnectReason::Timeout);
    assert!(record.disconnected_at.is_some());
    assert!(
        manager
            .activity()
            .iter()
            .any(|e| e.severity == Severity::Warning && e.address.as_deref() == Some(NODE_1))
    );
    state.shutdown().await;
}

#[tokio::test]
async fn adapter_reported_loss_is_unexpected() {
    let (state, adapter) = start(vec![node_1()], test_config("unexpected")).await;
    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    adapter.drop_link(NODE_1, LinkLoss::Unexpected);
    let manager = &state.bluetooth_manager;
    assert!(
        wait_until(|| {
            manager
                .device(NODE_1)
                .is_ok_and(|r| r.disconnect_reason == DisconnectReason::Unexpected)
        })
        .await
    );
    assert_eq!(
        manager.device(NODE_1).unwrap().connection_status,
        ConnectionStatus::Discovered
    );
    state.shutdown().await;
}

#[tokio::test]
async fn repeated_advertisements_keep_one_record_per_address() {
    let (state, _adapter) = start(vec![node_1()], test_config("dedup")).await;
    discover(&state, &[NODE_1]).await;
    let manager = &state.bluetooth_manager;
    let first = manager.device(NODE_1).unwrap();

    // The simulated radio re-advertises every 100 ms.
    assert!(
        wait_until(|| {
            manager
                .device(NODE_1)
                .is_ok_and(|r| r.discovered_at > first.discovered_at)
        })
        .await
    );
    let devices = manager.devices();
    assert_eq!(devices.iter().filter(|d| d.address == NODE_1).count(), 1);
    assert_eq!(
        manager.device(NODE_1).unwrap().first_discovered_at,
        first.first_discovered_at
    );
    let discoveries = manager
        .activity()
        .iter()
        .filter(|e| e.message.starts_with("Discovered"))
        .count();
    assert_eq!(discoveries, 1);
    state.shutdown().await;
}

#[tokio::test]
async fn scan_ignores_other_names_and_services() {
    let devices = vec![
        node_1(),
        SimulatedDevice::new("AA:BB:CC:DD:EE:03", "Thermostat", -40),
        SimulatedDevice::new("AA:BB:CC:DD:EE:04", "hublink-no-service", -40)
            .with_services(vec![Uuid::from_u128(0x1234)]),
    ];
    let (state, _adapter) = start(devices, test_config("filter")).await;
    discover(&state, &[NODE_1]).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let status = commands::get_scanner_status(&state).into_result().unwrap();
    assert_eq!(status.discovered_count, 1);
    assert_eq!(status.name_filter.as_deref(), Some("Hublink"));
    assert!(status.is_scanning);
    assert!(status.scan_start_time.is_some());
    assert!(status.devices[0].advertisement_data.service_uuids.contains(&UUID_HUBLINK_SERVICE));
    state.shutdown().await;
}

#[tokio::test]
async fn scan_sessions_do_not_overlap() {
    let (state, _adapter) = start(vec![node_1()], test_config("overlap")).await;
    let manager = &state.bluetooth_manager;

    manager.start_scan(None, None).await.unwrap();
    let second = commands::start_scan(&state, Some("Hublink")).await;
    assert_eq!(second.error_kind(), Some(ErrorKind::AlreadyScanning));

    commands::stop_scan(&state).await.into_result().unwrap();
    assert!(commands::stop_scan(&state).await.success);
    manager
        .start_scan(None, Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(wait_until(|| !manager.scanner_status().is_scanning).await);
    assert!(manager.start_scan(None, None).await.is_ok());
    state.shutdown().await;
}

#[tokio::test]
async fn connect_to_unknown_address_fails() {
    let (state, _adapter) = start(vec![node_1()], test_config("unknown")).await;
    let result = commands::connect_to_device(&state, "00:11:22:33:44:55").await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::UnknownAddress));
    state.shutdown().await;
}

#[tokio::test]
async fn only_one_device_may_be_connected() {
    let devices = vec![
        node_1(),
        SimulatedDevice::new(NODE_2, "Hublink-Node-2", -60).with_status("battery=12"),
    ];
    let (state, adapter) = start(devices, test_config("single")).await;
    discover(&state, &[NODE_1, NODE_2]).await;

    state.bluetooth_manager.connect(NODE_1).await.unwrap();
    let again = commands::connect_to_device(&state, NODE_1).await;
    assert_eq!(again.error_kind(), Some(ErrorKind::AlreadyConnected));
    let other = commands::connect_to_device(&state, NODE_2).await;
    assert_eq!(other.error_kind(), Some(ErrorKind::AlreadyConnected));
    assert_eq!(adapter.connect_attempts(NODE_2), 0);
    assert_eq!(
        state.bluetooth_manager.device(NODE_2).unwrap().connection_status,
        ConnectionStatus::Discovered
    );
    state.shutdown().await;
}

#[tokio::test]
async fn concurrent_connect_is_refused() {
    let mut slow = node_1();
    slow.connect_delay = Some(Duration::from_millis(200));
    let devices = vec![
        slow,
        SimulatedDevice::new(NODE_2, "Hublink-Node-2", -60),
    ];
    let (state, _adapter) = start(devices, test_config("in-progress")).await;
    discover(&state, &[NODE_1, NODE_2]).await;

    let manager = state.get_bluetooth_manager_arc();
    let first = tokio::spawn(async move { manager.connect(NODE_1).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = commands::connect_to_device(&state, NODE_2).await;
    assert_eq!(second.error_kind(), Some(ErrorKind::ConnectionInProgress));
    let record = first.await.unwrap().unwrap();
    assert_eq!(record.connection_status, ConnectionStatus::Connected);
    state.shutdown().await;
}

#[tokio::test]
async fn failed_status_read_keeps_connection() {
    let mut device = node_1();
    device.fail_reads = true;
    let (state, adapter) = start(vec![device], test_config("read-fail")).await;
    discover(&state, &[NODE_1]).await;

    let record = state.bluetooth_manager.connect(NODE_1).await.unwrap();
    assert_eq!(record.connection_status, ConnectionStatus::Connected);
    assert_eq!(record.node_data_raw, None);
    assert_eq!(adapter.read_count(NODE_1), 1);
    assert!(
        state
            .bluetooth_manager
            .activity()
            .iter()
            .any(|e| e.severity == Severity::Warning && e.message.contains("Status read"))
    );

    let read = commands::read_status(&state, NODE_1).await;
    assert_eq!(read.error_kind(), Some(ErrorKind::ReadFailed));
    state.shutdown().await;
}

#[tokio::test]
async fn refused_connection_returns_to_discovered() {
    let mut device = node_1();
    device.reject_connect = true;
    let mut config = test_config("refused");
    config.connection.connect_attempts = 3;
    let (state, adapter) = start(vec![device], config).await;
    discover(&state, &[NODE_1]).await;

    let result = commands::connect_to_device(&state, NODE_1).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ConnectFailed));
    assert_eq!(adapter.connect_attempts(NODE_1), 3);
    let record = state.bluetooth_manager.device(NODE_1).unwrap();
    assert_eq!(record.connection_status, ConnectionStatus::Discovered);
    assert_eq!(record.disconnect_reason, DisconnectReason::Unexpected);
    state.shutdown().await;
}

#[tokio::test]
async fn connect_timeout_never_leaves_device_connecting() {
    let mut device = node_1();
    device.connect_delay = Some(Duration::from_secs(5));
    let (state, _adapter) = start(vec![device], test_config("connect-timeout")).await;
    discover(&state, &[NODE_1]).await;

    let result = commands::connect_to_device(&state, NODE_1).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ConnectTimeout));
    let record = state.bluetooth_manager.device(NODE_1).unwrap();
    assert_eq!(record.connection_status, ConnectionStatus::Discovered);
    assert_eq!(record.disconnect_reason, DisconnectReason::Unexpected);
    state.shutdown().await;
}

#[tokio::test]
async fn device_without_hublink_service_fails_to_connect() {
    let (state, adapter) = start(vec![node_1()], test_config("no-service")).await;
    discover(&state, &[NODE_1]).await;
    adapter.update_device(NODE_1, |d| d.services.clear());

    let result = commands::connect_to_device(&state, NODE_1).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ServiceNotFound));
    state.shutdown().await;
}

#[tokio::test]
async fn manual_disconnect_records_manual_reason() {
    let (state, adapter) = start(vec![node_1()], test_config("manual")).await;
    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    let record = commands::disconnect(&state, NODE_1)
        .await
        .into_result()
        .unwrap();
    assert_eq!(record.connection_status, ConnectionStatus::Discovered);
    assert_eq!(record.disconnect_reason, DisconnectReason::Manual);
    assert!(!adapter.is_linked(NODE_1));

    let again = commands::disconnect(&state, NODE_1).await;
    assert_eq!(again.error_kind(), Some(ErrorKind::NotConnected));
    state.shutdown().await;
}

#[tokio::test]
async fn disconnect_all_never_fails() {
    let (state, adapter) = start(vec![node_1()], test_config("disconnect-all")).await;
    assert_eq!(commands::disconnect_all(&state).await.into_result().unwrap(), 0);

    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();
    assert_eq!(commands::disconnect_all(&state).await.into_result().unwrap(), 1);
    let record = state.bluetooth_manager.device(NODE_1).unwrap();
    assert_eq!(record.disconnect_reason, DisconnectReason::Manual);
    assert!(!adapter.is_linked(NODE_1));
    state.shutdown().await;
}

#[tokio::test]
async fn reads_and_writes_need_a_connection() {
    let (state, _adapter) = start(vec![node_1()], test_config("not-connected")).await;
    discover(&state, &[NODE_1]).await;

    let read = commands::read_status(&state, NODE_1).await;
    assert_eq!(read.error_kind(), Some(ErrorKind::NotConnected));
    let write = commands::send_raw_command(&state, NODE_1, "ping").await;
    assert_eq!(write.error_kind(), Some(ErrorKind::NotConnected));
    state.shutdown().await;
}

#[tokio::test]
async fn stale_link_is_noticed_on_write() {
    let mut config = test_config("stale");
    config.connection.keepalive_interval_ms = 60_000;
    let (state, adapter) = start(vec![node_1()], config).await;
    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    adapter.drop_link(NODE_1, LinkLoss::Timeout);
    let write = commands::send_raw_command(&state, NODE_1, r#"{"ping":1}"#).await;
    assert_eq!(write.error_kind(), Some(ErrorKind::NotConnected));
    let record = state.bluetooth_manager.device(NODE_1).unwrap();
    assert_eq!(record.connection_status, ConnectionStatus::Discovered);
    assert_eq!(record.disconnect_reason, DisconnectReason::Timeout);
    assert!(adapter.writes(NODE_1).is_empty());
    state.shutdown().await;
}

#[tokio::test]
async fn named_command_is_resolved_before_sending() {
    let config = test_config("named");
    tokio::fs::write(
        &config.commands.path,
        r#"{"sync_time": {"timestamp": -1}, "status": {"command": "status"}}"#,
    )
    .await
    .unwrap();
    let path = config.commands.path.clone();
    let (state, adapter) = start(vec![node_1()], config).await;
    assert_eq!(
        commands::list_commands(&state).into_result().unwrap(),
        vec!["status".to_string(), "sync_time".to_string()]
    );
    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    let before = Utc::now().timestamp();
    let report = commands::send_named_command(&state, NODE_1, "sync_time")
        .await
        .into_result()
        .unwrap();
    let after = Utc::now().timestamp();

    let written = String::from_utf8(adapter.written_payload(NODE_1)).unwrap();
    assert_eq!(written, report.payload);
    let sent: serde_json::Value = serde_json::from_str(&written).unwrap();
    let timestamp = sent["timestamp"].as_i64().unwrap();
    assert!(before <= timestamp && timestamp <= after);
    assert_eq!(report.bytes, written.len());

    let unknown = commands::send_named_command(&state, NODE_1, "reboot").await;
    assert_eq!(unknown.error_kind(), Some(ErrorKind::UnknownCommand));
    state.shutdown().await;
    let _ = tokio::fs::remove_file(path).await;
}

#[tokio::test]
async fn long_commands_are_chunked_or_refused() {
    let mut config = test_config("chunks");
    config.connection.max_write_chunks = 4;
    let (state, adapter) = start(vec![node_1().with_transfer_unit(8)], config).await;
    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    let report = commands::send_raw_command(&state, NODE_1, "0123456789abcdef0123")
        .await
        .into_result()
        .unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(adapter.writes(NODE_1).len(), 3);
    assert_eq!(adapter.written_payload(NODE_1), b"0123456789abcdef0123".to_vec());

    let oversized = "x".repeat(33);
    let refused = commands::send_raw_command(&state, NODE_1, &oversized).await;
    assert_eq!(refused.error_kind(), Some(ErrorKind::PayloadTooLarge));
    assert_eq!(adapter.writes(NODE_1).len(), 3);
    state.shutdown().await;
}

#[tokio::test]
async fn upload_path_follows_the_latest_status() {
    let device = SimulatedDevice::new(NODE_1, "Hublink-Node-1", -52)
        .with_status(r#"{"upload_path":"/data/uploads","status":"ready"}"#);
    let (state, adapter) = start(vec![device], test_config("upload")).await;
    discover(&state, &[NODE_1]).await;

    let record = commands::connect_to_device(&state, NODE_1)
        .await
        .into_result()
        .unwrap();
    assert_eq!(record.upload_path.as_deref(), Some("/data/uploads"));

    adapter.update_device(NODE_1, |d| d.status_payload = Some("battery=40".to_string()));
    let status = commands::read_status(&state, NODE_1).await.into_result().unwrap();
    assert_eq!(status, "battery=40");
    let record = commands::get_device(&state, NODE_1).into_result().unwrap();
    assert_eq!(record.node_data_raw.as_deref(), Some("battery=40"));
    assert_eq!(record.upload_path, None);
    state.shutdown().await;
}

#[tokio::test]
async fn empty_raw_command_still_reaches_the_device() {
    let (state, adapter) = start(vec![node_1()], test_config("empty")).await;
    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    let report = commands::send_raw_command(&state, NODE_1, "")
        .await
        .into_result()
        .unwrap();
    assert_eq!((report.bytes, report.chunks), (0, 1));
    assert_eq!(adapter.writes(NODE_1).len(), 1);
    state.shutdown().await;
}

#[tokio::test]
async fn oversized_integers_are_sent_unchanged() {
    let (state, adapter) = start(vec![node_1()], test_config("unsigned")).await;
    discover(&state, &[NODE_1]).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    commands::send_raw_command(&state, NODE_1, r#"{"id":18446744073709551615,"t":-1}"#)
        .await
        .into_result()
        .unwrap();
    let written = String::from_utf8(adapter.written_payload(NODE_1)).unwrap();
    assert!(written.starts_with(r#"{"id":18446744073709551615,"t":"#));
    assert!(!written.contains("-1"));
    state.shutdown().await;
}

#[tokio::test]
async fn reload_reports_counts_and_drops_removed_commands() {
    let config = test_config("reload");
    let path = config.commands.path.clone();
    tokio::fs::write(&path, r#"{"start": {"go": true}, "stop": {"go": false}}"#)
        .await
        .unwrap();
    let (state, _adapter) = start(vec![], config).await;

    tokio::fs::write(&path, r#"{"start": {"go": true}, "pause": {"go": null}}"#)
        .await
        .unwrap();
    let report = commands::reload_commands(&state).await.into_result().unwrap();
    assert_eq!((report.old_count, report.new_count), (2, 2));
    assert_eq!(
        commands::list_commands(&state).into_result().unwrap(),
        vec!["pause".to_string(), "start".to_string()]
    );
    let stale = commands::send_named_command(&state, NODE_1, "stop").await;
    assert_eq!(stale.error_kind(), Some(ErrorKind::UnknownCommand));

    tokio::fs::write(&path, r#"{"start": "#).await.unwrap();
    let malformed = commands::reload_commands(&state).await;
    assert_eq!(malformed.error_kind(), Some(ErrorKind::MalformedSource));
    assert!(commands::list_commands(&state).into_result().unwrap().is_empty());

    let status = commands::get_command_file_status(&state).await.into_result().unwrap();
    assert!(status.found);
    assert_eq!(status.path, path);
    state.shutdown().await;
    let _ = tokio::fs::remove_file(path).await;
}

#[tokio::test]
async fn missing_adapter_disables_radio_only() {
    let config = test_config("no-adapter");
    let state = AppState::with_adapter(None, config).await.unwrap();

    let scan = commands::start_scan(&state, None).await;
    assert_eq!(scan.error_kind(), Some(ErrorKind::AdapterUnavailable));
    let status = commands::get_scanner_status(&state).into_result().unwrap();
    assert!(!status.adapter_available);
    assert!(!status.is_scanning);
    assert!(commands::list_devices(&state).into_result().unwrap().is_empty());
    assert!(commands::list_commands(&state).success);
    assert!(!commands::get_command_file_status(&state).await.into_result().unwrap().found);
    assert_eq!(commands::disconnect_all(&state).await.into_result().unwrap(), 0);
    state.shutdown().await;
}

#[tokio::test]
async fn recent_activity_is_bounded_and_ordered() {
    let mut config = test_config("activity");
    config.activity.capacity = 3;
    let (state, _adapter) = start(vec![node_1()], config).await;
    discover(&state, &[NODE_1]).await;
    commands::stop_scan(&state).await;
    state.bluetooth_manager.connect(NODE_1).await.unwrap();

    let events = commands::get_activity(&state, 10).into_result().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(events.last().unwrap().message, "Connected to Hublink-Node-1");
    state.shutdown().await;
}
