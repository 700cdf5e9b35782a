//! Lifecycle Tests
//!
//! Drives the whole object graph (manager, devices, plugins) through
//! construction, trust operations, membership changes and teardown.


use bus_fixtures::*;
use mconnect_core::channel::{Signal, DEVICE_INTERFACE, MANAGER_INTERFACE, PING_INTERFACE};
use mconnect_core::config::ModelConfig;
use mconnect_core::{DeviceEvent, DeviceManager, ManagerEvent, ModelError, OperationStatus};
use serde_json::json;
use std::time::Duration;

fn added(address: &str) -> ManagerEvent {
    ManagerEvent::DeviceAdded {
        address: address.to_string(),
    }
}

fn removed(address: &str) -> ManagerEvent {
    ManagerEvent::DeviceRemoved {
        address: address.to_string(),
    }
}

#[test]
fn test_custom_prefix_scenario() {
    let fixture = Fixture::with_config(
        &["/dev/0"],
        ModelConfig::default().with_capability_prefix("x.y."),
    );
    fixture.seed_device("/dev/0", &["x.y.Battery", "x.y.Custom"]);
    fixture.seed_battery("/dev/0", 64, json!(true));

    let (manager, events) = fixture.manager();

    let device = manager.device("/dev/0").unwrap();
    assert_eq!(device.plugin_names(), vec!["battery"]);
    assert_eq!(events.events(), vec![added("/dev/0")]);
}

#[test]
fn test_untrust_issues_no_call() {
    let fixture = Fixture::new(&["/dev/0"]);
    fixture.seed_device("/dev/0", &[]);
    let (manager, _events) = fixture.manager();
    let calls = fixture.bus.calls();

    assert_eq!(manager.untrust("/dev/0"), OperationStatus::NotImplemented);

    assert_eq!(fixture.bus.calls(), calls);
    assert!(manager.device("/dev/0").unwrap().is_trusted());
}

#[test]
fn test_trust_is_delegate_only() {
    let fixture = Fixture::new(&["/dev/0"]);
    fixture.seed_device("/dev/0", &[]);
    fixture
        .bus
        .set_property("/dev/0", DEVICE_INTERFACE, "Allowed", json!(false));
    let (manager, _events) = fixture.manager();
    let device = manager.device("/dev/0").unwrap();
    let device_events = record_device(&device);

    manager.trust("/dev/0").unwrap();

    assert_eq!(fixture.bus.call_count("AllowDevice"), 1);
    assert!(!device.is_trusted());
    assert!(device_events.events().is_empty());
}

#[test]
fn test_list_devices_is_unfiltered() {
    let fixture = Fixture::new(&[]);
    let (manager, _events) = fixture.manager();

    fixture.bus.reply(
        &ModelConfig::default().manager_path,
        MANAGER_INTERFACE,
        "ListDevices",
        json!(["/dev/9", "/dev/9", "not-a-path"]),
    );

    assert_eq!(
        manager.list_devices().unwrap(),
        vec!["/dev/9", "/dev/9", "not-a-path"]
    );
    assert!(manager.is_empty());
}

#[test]
fn test_construction_fails_when_daemon_is_gone() {
    let fixture = Fixture::new(&["/dev/0"]);
    fixture.seed_device("/dev/0", &[]);
    fixture.bus.set_offline(true);

    let result = DeviceManager::new(&fixture.context);
    assert!(matches!(result, Err(ModelError::Channel(_))));
}

#[test]
fn test_membership_changes() {
    let fixture = Fixture::new(&["/dev/0"]);
    fixture.seed_device("/dev/0", &["kdeconnect.ping"]);
    fixture.seed_device("/dev/1", &["kdeconnect.ping"]);
    let (manager, events) = fixture.manager();

    manager.add_device("/dev/1").unwrap();
    manager.add_device("/dev/1").unwrap();
    manager.remove_device("/dev/0").unwrap();

    assert_eq!(manager.device_addresses(), vec!["/dev/1"]);
    assert_eq!(
        events.events(),
        vec![added("/dev/0"), added("/dev/1"), removed("/dev/0")]
    );
    assert_eq!(fixture.bus.subscription_count_for("/dev/0"), 0);
    assert_eq!(fixture.bus.subscription_count_for("/dev/1"), 2);
}

#[test]
fn test_removed_device_ignores_late_signals() {
    let fixture = Fixture::new(&["/dev/0"]);
    fixture.seed_device("/dev/0", &["kdeconnect.ping"]);
    let (manager, _events) = fixture.manager();

    // A UI still holding the device after removal
    let device = manager.device("/dev/0").unwrap();
    let device_events = record_device(&device);
    manager.remove_device("/dev/0").unwrap();

    assert_eq!(
        fixture
            .bus
            .emit("/dev/0", &Signal::new(PING_INTERFACE, "Ping", vec![])),
        0
    );
    assert!(device.is_destroyed());
    assert!(device_events.events().is_empty());
    assert_eq!(device.observer_count(), 0);
}

#[test]
fn test_destroy_tears_down_innermost_first() {
    let fixture = Fixture::new(&["/dev/0", "/dev/1"]);
    fixture.seed_device("/dev/0", &["kdeconnect.ping", "kdeconnect.battery"]);
    fixture.seed_device("/dev/1", &["kdeconnect.ping"]);
    fixture.seed_battery("/dev/0", 80, json!(false));
    let (manager, events) = fixture.manager();
    let devices = manager.devices();
    assert_eq!(fixture.bus.subscription_count(), 4);

    manager.destroy();

    assert_eq!(fixture.bus.subscription_count(), 0);
    for device in &devices {
        assert!(device.is_destroyed());
        assert_eq!(device.plugin_count(), 0);
    }
    assert_eq!(
        events.events(),
        vec![
            added("/dev/0"),
            added("/dev/1"),
            removed("/dev/0"),
            removed("/dev/1")
        ]
    );
}

#[test]
fn test_drop_releases_everything() {
    let fixture = Fixture::new(&["/dev/0"]);
    fixture.seed_device("/dev/0", &["kdeconnect.ping"]);

    {
        let (_manager, _events) = fixture.manager();
        assert_eq!(fixture.bus.subscription_count(), 2);
    }

    assert_eq!(fixture.bus.subscription_count(), 0);
}

#[test]
fn test_config_file_drives_manager_path() {
    let config = ModelConfig::from_json_str(
        r#"{ "manager_path": "/com/example/manager", "capability_prefix": "kdeconnect." }"#,
    )
    .unwrap();
    let fixture = Fixture::with_config(&["/dev/0"], config);
    fixture.seed_device("/dev/0", &["kdeconnect.battery"]);
    fixture.seed_battery("/dev/0", 12, json!(false));

    let (manager, _events) = fixture.manager();

    assert_eq!(fixture.bus.calls()[0].path, "/com/example/manager");
    assert!(manager.device("/dev/0").unwrap().battery().unwrap().is_low());
}

#[tokio::test]
async fn test_events_reach_async_consumers() {
    let fixture = Fixture::new(&["/dev/0"]);
    fixture.seed_device("/dev/0", &["kdeconnect.ping"]);
    let (manager, _events) = fixture.manager();
    let device = manager.device("/dev/0").unwrap();

    let (_id, mut device_rx) = device.subscribe();
    let (_id, mut manager_rx) = manager.subscribe();

    let bus = fixture.bus.clone();
    tokio::task::spawn_blocking(move || {
        bus.emit("/dev/0", &Signal::new(PING_INTERFACE, "Ping", vec![]));
    })
    .await
    .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), device_rx.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(DeviceEvent::PingReceived));

    manager.remove_device("/dev/0").unwrap();
    assert_eq!(manager_rx.recv().await, Some(removed("/dev/0")));
    assert_eq!(device_rx.recv().await, None);
}
