use crate::auth::SensorAuthorizer;
use crate::config::MqttSettings;
use crate::error::MQTTError;
use crate::models::PersistenceGateway;
use crate::mqtt::{ConnectionState, MessageRouter, MqttSensorClient};
use crate::sensor::IngestionObserver;

use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[cfg(test)]
mod test;

/// The ingestion pipeline: broker session, router, handlers and the shared
/// allow-list, wired together once by `main`.
pub struct IngestionService {
    mqtt: MqttSensorClient,
    observer: Arc<IngestionObserver>,
    authorizer: Arc<SensorAuthorizer>,
    observer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for IngestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionService")
            .field("broker", &self.broker_url())
            .field("state", &self.connection_state())
            .finish()
    }
}

impl IngestionService {
    pub fn new(
        settings: MqttSettings,
        queue_capacity: usize,
        authorizer: Arc<SensorAuthorizer>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        // bounded, the router drops messages once the handlers fall behind
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let router = MessageRouter::new(authorizer.clone(), sender);
        let observer = IngestionObserver::new(gateway, authorizer.clone(), receiver);

        IngestionService {
            mqtt: MqttSensorClient::new(settings, router),
            observer,
            authorizer,
            observer_task: Mutex::new(None),
        }
    }

    /// Starts the handler loop, then the broker session. Returns immediately.
    pub fn start(&self) -> Result<(), MQTTError> {
        if self.mqtt.is_terminated() {
            return Err(MQTTError::Terminated);
        }
        self.spawn_observer();
        self.mqtt.connect()
    }

    #[cfg(test)]
    pub(crate) fn start_with_session<E>(
        &self,
        session: Arc<dyn crate::mqtt::SessionHandle>,
        events: E,
    ) -> Result<(), MQTTError>
    where
        E: crate::mqtt::SessionEvents + 'static,
    {
        if self.mqtt.is_terminated() {
            return Err(MQTTError::Terminated);
        }
        self.spawn_observer();
        self.mqtt.attach_session(session, events)
    }

    /// Closes the session for good and waits until queued messages are handled.
    pub async fn stop(&self) {
        self.mqtt.disconnect().await;

        let observer_task = self.observer_task.lock().take();
        if let Some(handle) = observer_task {
            if let Err(e) = handle.await {
                error!("Ingestion loop ended abnormally: {}", e);
            }
        }
        info!("Ingestion service stopped");
    }

    pub fn authorizer(&self) -> &Arc<SensorAuthorizer> {
        &self.authorizer
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.mqtt.state()
    }

    pub fn is_connected(&self) -> bool {
        self.mqtt.is_connected()
    }

    pub fn broker_url(&self) -> &str {
        self.mqtt.broker_url()
    }

    fn spawn_observer(&self) {
        let mut observer_task = self.observer_task.lock();
        if observer_task.is_none() {
            let observer = self.observer.clone();
            *observer_task = Some(tokio::spawn(observer.dispatch_receive_loop()));
        }
    }
}
