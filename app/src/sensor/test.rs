use super::*;
use crate::auth::SensorAuthorizer;
use crate::error::{DBError, IngestError};
use crate::models::{MemoryGateway, PersistenceGateway};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use soilsense_core::{NewReading, SensorDefaults, SensorStatus};
use std::sync::Arc;
use tokio::sync::mpsc::channel;

fn payload(value: Value) -> Payload {
    value.as_object().unwrap().clone()
}

fn data(value: Value) -> SensorMessage {
    SensorMessage::Data(tracing::Span::none(), payload(value))
}

fn build_authorizer() -> Arc<SensorAuthorizer> {
    Arc::new(SensorAuthorizer::new(
        || vec!["SENSOR_01".to_owned(), "FOO_001".to_owned()],
        false,
    ))
}

fn build_observer(gateway: Arc<dyn PersistenceGateway>) -> (Arc<IngestionObserver>, SensorSender) {
    let (sender, receiver) = channel(16);
    let observer = IngestionObserver::new(gateway, build_authorizer(), receiver);
    (observer, sender)
}

/// Fails every insert for one sensor, otherwise behaves like memory.
struct FlakyGateway {
    inner: MemoryGateway,
    broken_sensor: &'static str,
}

#[async_trait]
impl PersistenceGateway for FlakyGateway {
    async fn sensor_exists(&self, sensor_id: &str) -> Result<bool, DBError> {
        self.inner.sensor_exists(sensor_id).await
    }

    async fn create_sensor(
        &self,
        sensor_id: &str,
        defaults: &SensorDefaults,
    ) -> Result<(), DBError> {
        self.inner.create_sensor(sensor_id, defaults).await
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<(), DBError> {
        if reading.sensor_id == self.broken_sensor {
            return Err(DBError::SQLError(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert_reading(reading).await
    }
}

#[tokio::test]
async fn test_first_reading_provisions_sensor() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, _sender) = build_observer(gateway.clone());
    let before = Utc::now();

    observer
        .handle_message("ESP32_099", data(json!({"moisture": 42.5})))
        .await
        .unwrap();

    let sensor = gateway.sensor("ESP32_099").unwrap();
    assert_eq!("Unassigned Field", sensor.location);
    assert_eq!(SensorStatus::Active, sensor.status);
    assert_eq!(0.0, sensor.calibration_min);
    assert_eq!(0.0, sensor.calibration_max);

    let readings = gateway.readings();
    assert_eq!(1, readings.len());
    assert_eq!(42.5, readings[0].moisture_value);
    assert!(readings[0].timestamp >= before);
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, _sender) = build_observer(gateway.clone());

    for value in [30.0, 31.5] {
        observer
            .handle_message("ESP32_123", data(json!({ "moisture": value })))
            .await
            .unwrap();
    }

    assert_eq!(1, gateway.sensor_count());
    let readings = gateway.readings();
    assert_eq!(2, readings.len());
    assert_eq!(vec![1, 2], readings.iter().map(|r| r.id).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_missing_moisture_still_provisions() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, _sender) = build_observer(gateway.clone());

    let res = observer
        .handle_message("AGRI_plot_4", data(json!({"temperature": 18.0})))
        .await;

    assert!(matches!(res, Err(IngestError::MissingRequiredField("moisture"))));
    assert!(gateway.sensor("AGRI_plot_4").is_some());
    assert_eq!(0, gateway.reading_count());
}

#[tokio::test]
async fn test_unauthorized_sensor_writes_nothing() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, _sender) = build_observer(gateway.clone());

    let res = observer
        .handle_message("BAR_001", data(json!({"moisture": 10})))
        .await;

    assert!(matches!(res, Err(IngestError::UnauthorizedSensor { .. })));
    assert_eq!(0, gateway.sensor_count());
    assert_eq!(0, gateway.reading_count());
}

#[tokio::test]
async fn test_allow_listed_sensor_passes_handler_check() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, _sender) = build_observer(gateway.clone());

    // the router would have dropped this already, the handler alone accepts it
    observer
        .handle_message("FOO_001", data(json!({"moisture": 10})))
        .await
        .unwrap();

    assert_eq!(1, gateway.reading_count());
}

#[tokio::test]
async fn test_source_timestamp_and_extras_are_kept() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, _sender) = build_observer(gateway.clone());

    observer
        .handle_message(
            "SENSOR_01",
            data(json!({
                "value": 12,
                "timestamp": "2024-05-01T06:30:00Z",
                "temperature": 14.5,
                "humidity": 71
            })),
        )
        .await
        .unwrap();

    let reading = gateway.readings().remove(0);
    assert_eq!(12.0, reading.moisture_value);
    assert_eq!(Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap(), reading.timestamp);
    assert_eq!(Some(14.5), reading.temperature);
    assert_eq!(Some(71.0), reading.humidity);
}

#[tokio::test]
async fn test_register_and_status_only_check_authorization() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, _sender) = build_observer(gateway.clone());
    let register = || SensorMessage::Register(tracing::Span::none(), payload(json!({"fw": "1.2"})));
    let status = || SensorMessage::Status(tracing::Span::none(), payload(json!({"status": "ok"})));

    assert!(observer.handle_message("ESP32_001", register()).await.is_ok());
    assert!(observer.handle_message("ESP32_001", status()).await.is_ok());
    assert!(observer.handle_message("BAR_001", register()).await.is_err());
    assert!(observer.handle_message("BAR_001", status()).await.is_err());
    assert_eq!(0, gateway.sensor_count());
}

#[tokio::test]
async fn test_loop_survives_persistence_failure() {
    let gateway = Arc::new(FlakyGateway {
        inner: MemoryGateway::new(),
        broken_sensor: "ESP32_BAD",
    });
    let (observer, sender) = build_observer(gateway.clone());

    sender.try_send(("ESP32_BAD".to_owned(), data(json!({"moisture": 1})))).unwrap();
    sender.try_send(("ESP32_001".to_owned(), data(json!({"moisture": 2})))).unwrap();
    drop(sender);
    observer.dispatch_receive_loop().await;

    assert_eq!(2, gateway.inner.sensor_count());
    let readings = gateway.inner.readings();
    assert_eq!(1, readings.len());
    assert_eq!("ESP32_001", readings[0].sensor_id);
}

#[tokio::test]
async fn test_loop_drains_queue_before_exit() {
    let gateway = Arc::new(MemoryGateway::new());
    let (observer, sender) = build_observer(gateway.clone());

    for i in 0..10 {
        sender
            .try_send(("ESP32_001".to_owned(), data(json!({ "moisture": i }))))
            .unwrap();
    }
    sender
        .try_send(("ESP32_001".to_owned(), data(json!({"moisture": "wet"}))))
        .unwrap();
    drop(sender);

    let handle = tokio::spawn(observer.clone().dispatch_receive_loop());
    handle.await.unwrap();

    let values: Vec<f64> = gateway.readings().iter().map(|r| r.moisture_value).collect();
    assert_eq!((0..10).map(f64::from).collect::<Vec<_>>(), values);

    // a closed channel ends a second loop right away
    observer.dispatch_receive_loop().await;
}
