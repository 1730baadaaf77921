use super::*;
use crate::models::MemoryGateway;
use crate::mqtt::fakes::{scripted, wait_until, RecordingSession};
use crate::mqtt::SessionEvent;

use std::time::Duration;

fn settings() -> MqttSettings {
    MqttSettings {
        broker_url: "mqtt://broker.farm.local:1883".to_owned(),
        username: None,
        password: None,
        client_prefix: "soilsense_test".to_owned(),
        keep_alive: Duration::from_secs(60),
        connect_timeout: Duration::from_millis(200),
        retry_interval: Duration::from_millis(20),
        legacy_moisture_topic: false,
    }
}

fn build_service(gateway: Arc<MemoryGateway>) -> IngestionService {
    let authorizer = Arc::new(SensorAuthorizer::new(
        || vec!["SENSOR_01".to_owned(), "ESP32_001".to_owned()],
        false,
    ));
    IngestionService::new(settings(), 64, authorizer, gateway)
}

fn publish(topic: &str, payload: &[u8]) -> SessionEvent {
    SessionEvent::Message {
        topic: topic.to_owned(),
        payload: payload.to_vec(),
    }
}

#[tokio::test]
async fn test_reading_survives_reconnect() {
    let gateway = Arc::new(MemoryGateway::new());
    let service = build_service(gateway.clone());
    let session = Arc::new(RecordingSession::default());
    let (events, scripted_events) = scripted();
    service.start_with_session(session.clone(), scripted_events).unwrap();

    events.send(SessionEvent::Connected).unwrap();
    events.send(publish("sensor/ESP32_099/data", br#"{"moisture": 42.5}"#)).unwrap();
    wait_until(|| gateway.reading_count() == 1).await;
    assert_eq!("Unassigned Field", gateway.sensor("ESP32_099").unwrap().location);

    events.send(SessionEvent::Failed("transport closed".to_owned())).unwrap();
    events.send(SessionEvent::Connected).unwrap();
    wait_until(|| session.subscriptions().len() == 6).await;
    assert!(service.is_connected());

    events.send(publish("sensor/ESP32_001/data", br#"{"moisture": 55}"#)).unwrap();
    wait_until(|| gateway.reading_count() == 2).await;

    service.stop().await;
    let readings = gateway.readings();
    assert_eq!("ESP32_001", readings[1].sensor_id);
    assert_eq!(55.0, readings[1].moisture_value);
    assert_eq!(ConnectionState::Disconnected, service.connection_state());
}

#[tokio::test]
async fn test_non_json_payload_keeps_session() {
    let gateway = Arc::new(MemoryGateway::new());
    let service = build_service(gateway.clone());
    let session = Arc::new(RecordingSession::default());
    let (events, scripted_events) = scripted();
    service.start_with_session(session.clone(), scripted_events).unwrap();

    events.send(SessionEvent::Connected).unwrap();
    events.send(publish("sensor/ESP32_001/data", b"moisture: 42")).unwrap();
    events.send(publish("sensor/ESP32_002/data", br#"{"moisture": 7}"#)).unwrap();
    wait_until(|| gateway.reading_count() == 1).await;
    assert!(service.is_connected());

    service.stop().await;
    assert!(gateway.sensor("ESP32_001").is_none());
    assert_eq!(1, gateway.sensor_count());
    assert_eq!(3, session.subscriptions().len());
}

#[tokio::test]
async fn test_allow_listed_foreign_prefix_stays_dropped() {
    let gateway = Arc::new(MemoryGateway::new());
    let service = build_service(gateway.clone());
    let session = Arc::new(RecordingSession::default());
    let (events, scripted_events) = scripted();
    service.start_with_session(session, scripted_events).unwrap();
    events.send(SessionEvent::Connected).unwrap();

    events.send(publish("sensor/FOO_001/data", br#"{"moisture": 10}"#)).unwrap();
    assert!(service.authorizer().add_allowed("FOO_001"));
    events.send(publish("sensor/FOO_001/data", br#"{"moisture": 10}"#)).unwrap();
    events.send(publish("sensor/SENSOR_01/data", br#"{"moisture": 11}"#)).unwrap();
    wait_until(|| gateway.reading_count() == 1).await;

    service.stop().await;
    assert_eq!(1, gateway.sensor_count());
    assert_eq!("SENSOR_01", gateway.readings()[0].sensor_id);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let gateway = Arc::new(MemoryGateway::new());
    let service = build_service(gateway);
    let (_events, scripted_events) = scripted();
    service
        .start_with_session(Arc::new(RecordingSession::default()), scripted_events)
        .unwrap();

    service.stop().await;
    service.stop().await;

    assert_eq!(ConnectionState::Disconnected, service.connection_state());
    assert!(matches!(service.start(), Err(MQTTError::Terminated)));
}

#[tokio::test]
async fn test_start_after_stop_spawns_nothing() {
    let gateway = Arc::new(MemoryGateway::new());
    let service = build_service(gateway);
    service.stop().await;

    assert!(matches!(service.start(), Err(MQTTError::Terminated)));
    let (_events, scripted_events) = scripted();
    let res = service.start_with_session(Arc::new(RecordingSession::default()), scripted_events);
    assert!(matches!(res, Err(MQTTError::Terminated)));
    assert!(service.observer_task.lock().is_none());
}
