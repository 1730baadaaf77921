use super::SensorMessage;
use crate::auth::SensorAuthorizer;
use crate::error::IngestError;
use crate::models::PersistenceGateway;

use chrono::Utc;
use soilsense_core::{Payload, ReadingMessage, SensorDefaults};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

/// Runs the ingestion handlers for every routed message.
///
/// There is exactly one receive loop, so all writes to the gateway happen
/// in arrival order from a single task.
pub struct IngestionObserver {
    gateway: Arc<dyn PersistenceGateway>,
    authorizer: Arc<SensorAuthorizer>,
    defaults: SensorDefaults,
    data_receiver: Mutex<Receiver<(String, SensorMessage)>>,
}

impl Debug for IngestionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionObserver").finish()
    }
}

impl IngestionObserver {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        authorizer: Arc<SensorAuthorizer>,
        data_receiver: Receiver<(String, SensorMessage)>,
    ) -> Arc<Self> {
        Arc::new(IngestionObserver {
            gateway,
            authorizer,
            defaults: SensorDefaults::default(),
            data_receiver: Mutex::new(data_receiver),
        })
    }

    /// Handles messages until every sender is dropped and the queue is empty.
    pub async fn dispatch_receive_loop(self: Arc<IngestionObserver>) {
        let receiver_res = self.data_receiver.try_lock();
        let mut receiver = match receiver_res {
            Ok(receiver) => receiver,
            Err(_) => {
                error!("dispatch_receive_loop() already called!");
                return;
            }
        };

        info!("Start capturing sensor data events");
        while let Some((sensor_id, msg)) = receiver.recv().await {
            let span = msg.span().clone();
            let result = self.handle_message(&sensor_id, msg).instrument(span.clone()).await;
            if let Err(e) = result {
                span.in_scope(|| match e {
                    IngestError::PersistenceFailure(_) => error!("Dropped message: {}", e),
                    _ => warn!("Dropped message: {}", e),
                });
            }
        }
        info!("Ended sensor data loop");
    }

    pub(crate) async fn handle_message(
        &self,
        sensor_id: &str,
        msg: SensorMessage,
    ) -> Result<(), IngestError> {
        match msg {
            SensorMessage::Data(_, payload) => self.on_data(sensor_id, &payload).await,
            SensorMessage::Register(_, payload) => self.on_register(sensor_id, &payload),
            SensorMessage::Status(_, payload) => self.on_status(sensor_id, &payload),
        }
    }

    async fn on_data(&self, sensor_id: &str, payload: &Payload) -> Result<(), IngestError> {
        self.authorizer.check_sensor(sensor_id)?;
        self.ensure_sensor(sensor_id).await?;

        let reading = ReadingMessage::from_payload(payload)?.into_reading(sensor_id, Utc::now());
        self.gateway.insert_reading(&reading).await?;
        debug!(
            moisture = reading.moisture_value,
            timestamp = %reading.timestamp,
            "Stored reading"
        );
        Ok(())
    }

    async fn ensure_sensor(&self, sensor_id: &str) -> Result<(), IngestError> {
        if self.gateway.sensor_exists(sensor_id).await? {
            return Ok(());
        }
        self.gateway.create_sensor(sensor_id, &self.defaults).await?;
        info!(
            location = %self.defaults.location,
            "Auto-provisioned sensor {}",
            sensor_id
        );
        Ok(())
    }

    fn on_register(&self, sensor_id: &str, payload: &Payload) -> Result<(), IngestError> {
        self.authorizer.check_sensor(sensor_id)?;
        info!(fields = payload.len(), "Sensor {} requested registration", sensor_id);
        Ok(())
    }

    fn on_status(&self, sensor_id: &str, payload: &Payload) -> Result<(), IngestError> {
        self.authorizer.check_sensor(sensor_id)?;
        let status = payload.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
        info!(status, "Sensor {} reported status", sensor_id);
        Ok(())
    }
}
