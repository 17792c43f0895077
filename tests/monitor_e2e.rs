use std::sync::Arc;
use std::time::Duration;

use envmonitor::config::{EnvMonitorConfig, TransportKind};
use envmonitor::lifecycle::SourceFactory;
use envmonitor::monitor::{
    ConnectOutcome, DisconnectOutcome, Monitor, MonitorError, MonitorHandle, MonitorState,
};
use envmonitor::mqtt::topics::{HUMIDITY_TOPIC, LIGHT_TOPIC, TEMPERATURE_TOPIC, WINDOW_TOPIC};
use envmonitor::mqtt::{LocalBroker, SessionOptions, Topic, Transport};
use envmonitor::sensor::{
    default_publishers, PublisherConfig, ReadingSource, ScriptedReadings, SensorReading,
};

const INTERVAL_MS: u64 = 20;

fn fast_publishers() -> Vec<PublisherConfig> {
    default_publishers()
        .into_iter()
        .map(|config| PublisherConfig {
            interval_ms: INTERVAL_MS,
            ..config
        })
        .collect()
}

/// Floor replays light ON/window OPEN then OFF/CLOSED, room sends one reading
fn scripted_sources() -> SourceFactory {
    Arc::new(|config: &PublisherConfig| {
        let cycles = match config.client_id.as_str() {
            "FloorPublisher" => vec![
                vec![
                    SensorReading::new(LIGHT_TOPIC, "ON"),
                    SensorReading::new(WINDOW_TOPIC, "OPEN"),
                ],
                vec![
                    SensorReading::new(LIGHT_TOPIC, "OFF"),
                    SensorReading::new(WINDOW_TOPIC, "CLOSED"),
                ],
            ],
            _ => vec![vec![
                SensorReading::new(TEMPERATURE_TOPIC, "21.5°C"),
                SensorReading::new(HUMIDITY_TOPIC, "45%"),
            ]],
        };
        Box::new(ScriptedReadings::new(cycles)) as Box<dyn ReadingSource>
    })
}

fn scripted_monitor(broker: &LocalBroker) -> Monitor {
    Monitor::new(
        Arc::new(broker.clone()) as Arc<dyn Transport>,
        SessionOptions::new("test"),
        fast_publishers(),
        Duration::from_secs(1),
    )
    .with_source_factory(scripted_sources())
}

fn silent_monitor(broker: &LocalBroker) -> Monitor {
    Monitor::new(
        Arc::new(broker.clone()) as Arc<dyn Transport>,
        SessionOptions::new("test"),
        Vec::new(),
        Duration::from_secs(1),
    )
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn payload(state: &MonitorState, topic: Topic) -> Option<String> {
    state.payload(topic)
}

#[tokio::test]
async fn scripted_floor_ends_with_last_cycle() {
    let broker = LocalBroker::new();
    let mut monitor = scripted_monitor(&broker);

    assert_eq!(monitor.connect().await.unwrap(), ConnectOutcome::Connected);

    let state = monitor.state().clone();
    wait_until("floor script to finish", || {
        payload(&state, Topic::Light).as_deref() == Some("OFF")
            && payload(&state, Topic::Window).as_deref() == Some("CLOSED")
    })
    .await;
    wait_until("room reading", || {
        payload(&state, Topic::Temperature).as_deref() == Some("21.5°C")
    })
    .await;
    assert_eq!(payload(&state, Topic::Humidity).as_deref(), Some("45%"));
    assert_eq!(broker.published_to(LIGHT_TOPIC), vec!["ON", "OFF"]);

    monitor.shutdown().await;
}

#[tokio::test]
async fn last_value_per_topic_wins() {
    let broker = LocalBroker::new();
    let mut monitor = silent_monitor(&broker);
    monitor.connect().await.unwrap();

    broker.inject(TEMPERATURE_TOPIC, "19.0°C");
    broker.inject(TEMPERATURE_TOPIC, "23.4°C");
    broker.inject(WINDOW_TOPIC, "OPEN");

    let state = monitor.state().clone();
    wait_until("both injected values", || {
        payload(&state, Topic::Temperature).as_deref() == Some("23.4°C")
            && payload(&state, Topic::Window).is_some()
    })
    .await;
    assert_eq!(payload(&state, Topic::Humidity), None);
    assert_eq!(payload(&state, Topic::Light), None);

    monitor.disconnect().await;
}

#[tokio::test]
async fn unsubscribed_topics_never_reach_the_state() {
    let broker = LocalBroker::new();
    let mut monitor = silent_monitor(&broker);
    monitor.connect().await.unwrap();

    broker.inject("floor/unknown", "42");
    broker.inject(LIGHT_TOPIC, "ON");

    let state = monitor.state().clone();
    wait_until("light", || payload(&state, Topic::Light).is_some()).await;
    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), Topic::ALL.len());
    assert!(snapshot
        .iter()
        .filter(|(topic, _)| **topic != Topic::Light)
        .all(|(_, reading)| reading.is_none()));

    monitor.disconnect().await;
}

#[tokio::test]
async fn second_connect_is_a_no_op() {
    let broker = LocalBroker::new();
    let mut monitor = scripted_monitor(&broker);
    monitor.connect().await.unwrap();

    let state = monitor.state().clone();
    wait_until("light", || payload(&state, Topic::Light).is_some()).await;
    let client_id = monitor.client_id().map(str::to_string);

    assert_eq!(
        monitor.connect().await.unwrap(),
        ConnectOutcome::AlreadyConnected
    );
    assert_eq!(monitor.client_id().map(str::to_string), client_id);
    assert!(payload(&state, Topic::Light).is_some());
    assert_eq!(
        monitor.coordinator().running(),
        vec!["FloorPublisher", "RoomSensorPublisher"]
    );
    assert_eq!(broker.takeovers(), 0);

    monitor.shutdown().await;
}

#[tokio::test]
async fn disconnect_stops_publishers_and_unsets_every_topic() {
    let broker = LocalBroker::new();
    let mut monitor = scripted_monitor(&broker);
    monitor.connect().await.unwrap();

    let state = monitor.state().clone();
    wait_until("both publishers", || {
        payload(&state, Topic::Window).is_some() && payload(&state, Topic::Temperature).is_some()
    })
    .await;

    assert_eq!(monitor.disconnect().await, DisconnectOutcome::Disconnected);
    assert!(state.is_empty());
    assert!(!monitor.is_connected());
    assert!(monitor.coordinator().running().is_empty());
    assert!(broker.connected_clients().is_empty());

    let published = broker.publish_count();
    tokio::time::sleep(Duration::from_millis(INTERVAL_MS * 3)).await;
    assert_eq!(broker.publish_count(), published);
    assert!(state.is_empty());

    // Each publisher reports its stop once, before disconnect returns
    assert_eq!(broker.published_to("floor/error"), vec!["Floor publisher stopped"]);
    assert_eq!(
        broker.published_to("room/sensor/error"),
        vec!["Room publisher stopped"]
    );

    // Clean stops leave the last will unannounced
    assert!(broker.published_to("floor/disconnect").is_empty());
    assert!(broker.published_to("room/sensor/disconnect").is_empty());

    assert_eq!(monitor.disconnect().await, DisconnectOutcome::NotConnected);
}

#[tokio::test]
async fn reconnect_starts_fresh_publishers() {
    let broker = LocalBroker::new();
    let mut monitor = scripted_monitor(&broker);
    let state = monitor.state().clone();

    monitor.connect().await.unwrap();
    wait_until("first run", || {
        payload(&state, Topic::Light).as_deref() == Some("OFF")
    })
    .await;
    monitor.disconnect().await;

    monitor.connect().await.unwrap();
    wait_until("second run", || {
        payload(&state, Topic::Light).as_deref() == Some("OFF")
    })
    .await;

    assert_eq!(broker.published_to(LIGHT_TOPIC), vec!["ON", "OFF", "ON", "OFF"]);
    assert_eq!(
        monitor.coordinator().running(),
        vec!["FloorPublisher", "RoomSensorPublisher"]
    );
    assert_eq!(broker.takeovers(), 0);

    monitor.shutdown().await;
}

#[tokio::test]
async fn refused_connect_starts_nothing() {
    let broker = LocalBroker::new();
    broker.set_refuse_connects(true);
    let mut monitor = scripted_monitor(&broker);

    let result = monitor.connect().await;
    assert!(matches!(result, Err(MonitorError::Connection(_))));
    assert!(!monitor.is_connected());
    assert!(monitor.coordinator().running().is_empty());
    assert_eq!(broker.publish_attempts(), 0);

    broker.set_refuse_connects(false);
    assert_eq!(monitor.connect().await.unwrap(), ConnectOutcome::Connected);
    monitor.shutdown().await;
}

#[tokio::test]
async fn failing_publisher_reports_and_leaves_the_other_running() {
    let broker = LocalBroker::new();
    broker.fail_publishes_to(LIGHT_TOPIC);
    let mut monitor = scripted_monitor(&broker);
    monitor.connect().await.unwrap();

    wait_until("floor error report", || {
        !broker.published_to("floor/error").is_empty()
    })
    .await;
    wait_until("floor task to end", || {
        !monitor.coordinator().is_running("FloorPublisher")
    })
    .await;

    assert!(monitor.is_connected());
    assert!(monitor.coordinator().is_running("RoomSensorPublisher"));
    assert_eq!(broker.published_to("floor/error").len(), 1);

    monitor.shutdown().await;
}

#[tokio::test]
async fn handle_drives_the_monitor_task() {
    let broker = LocalBroker::new();
    let (handle, task) = MonitorHandle::spawn(scripted_monitor(&broker));
    let mut changes = handle.subscribe_changes();

    assert_eq!(handle.connect().await.unwrap(), ConnectOutcome::Connected);
    let change = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let change = changes.recv().await.unwrap();
            if change.reading.is_some() {
                break change;
            }
        }
    })
    .await
    .unwrap();
    assert!(Topic::ALL.contains(&change.topic));

    let status = handle.status().await.unwrap();
    assert!(status.connected);
    assert!(status.client_id.unwrap().starts_with("envmonitor-"));
    assert_eq!(
        status.running_publishers,
        vec!["FloorPublisher", "RoomSensorPublisher"]
    );

    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert!(broker.connected_clients().is_empty());
    assert!(handle.state().is_empty());
    assert!(matches!(
        handle.status().await,
        Err(MonitorError::Channel(_))
    ));
}

#[tokio::test]
async fn dropping_every_handle_tears_down() {
    let broker = LocalBroker::new();
    let (handle, task) = MonitorHandle::spawn(scripted_monitor(&broker));
    handle.connect().await.unwrap();
    wait_until("publishers online", || broker.connected_clients().len() == 3).await;

    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert!(broker.connected_clients().is_empty());
}

#[tokio::test]
async fn config_file_is_created_and_drives_an_offline_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("envmonitor").join("config.toml");

    let created = EnvMonitorConfig::load_or_create(&path).await.unwrap();
    assert!(path.exists());
    assert_eq!(created, EnvMonitorConfig::default());

    let mut config = created;
    config.broker.transport = TransportKind::Local;
    for publisher in &mut config.publishers {
        publisher.interval_ms = INTERVAL_MS;
    }
    config.save(&path).await.unwrap();

    let loaded = EnvMonitorConfig::load(&path).await.unwrap();
    assert_eq!(loaded, config);

    let mut monitor = loaded.build_monitor().unwrap();
    assert_eq!(monitor.connect().await.unwrap(), ConnectOutcome::Connected);
    let state = monitor.state().clone();
    wait_until("random readings", || {
        Topic::ALL.iter().all(|topic| state.payload(*topic).is_some())
    })
    .await;
    monitor.shutdown().await;
}

#[tokio::test]
async fn broken_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    tokio::fs::write(&path, "[broker\nurl = ").await.unwrap();

    assert!(EnvMonitorConfig::load(&path).await.is_err());
}
