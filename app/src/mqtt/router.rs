use crate::auth::SensorAuthorizer;
use crate::error::IngestError;
use crate::sensor::{SensorMessage, SensorSender};
use soilsense_core::{parse_payload, MessageKind, SensorTopic};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info_span, warn};

/// Turns raw broker messages into [`SensorMessage`]s for the ingestion loop.
///
/// Performs no I/O besides logging. Messages that fail the topic gate are
/// dropped before their payload is looked at, and so is everything routed
/// while the ingestion queue is full.
pub struct MessageRouter {
    authorizer: Arc<SensorAuthorizer>,
    sender: SensorSender,
}

impl MessageRouter {
    pub fn new(authorizer: Arc<SensorAuthorizer>, sender: SensorSender) -> Self {
        MessageRouter { authorizer, sender }
    }

    /// Routes one message. Never fails, drops are logged.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        debug!(
            "Received topic: {}, {:?}",
            topic,
            std::str::from_utf8(payload)
        );
        if let Err(e) = self.route(topic, payload) {
            warn!(topic, "Dropped message: {}", e);
        }
    }

    /// Returns the dispatched kind, or `None` for endpoints nobody handles.
    pub(crate) fn route(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Option<MessageKind>, IngestError> {
        let path = SensorTopic::parse(topic)?;
        self.authorizer.check_topic(path.sensor_id)?;
        let payload = parse_payload(payload)?;

        let kind = match path.kind() {
            Some(kind) => kind,
            None => {
                debug!(
                    sensor_id = path.sensor_id,
                    endpoint = path.endpoint,
                    "Ignoring unknown message kind"
                );
                return Ok(None);
            }
        };

        let span = info_span!("sensor_message", sensor_id = path.sensor_id, kind = %kind);
        let msg = match kind {
            MessageKind::Data => SensorMessage::Data(span, payload),
            MessageKind::Register => SensorMessage::Register(span, payload),
            MessageKind::Status => SensorMessage::Status(span, payload),
        };
        match self.sender.try_send((path.sensor_id.to_owned(), msg)) {
            Ok(()) => Ok(Some(kind)),
            Err(TrySendError::Full(_)) => Err(IngestError::QueueFull),
            Err(TrySendError::Closed(_)) => {
                error!("Failed dispatching sensor message: ingestion loop is gone");
                Ok(Some(kind))
            }
        }
    }
}
