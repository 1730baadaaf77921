use soilsense_core::Payload;
use tokio::sync::mpsc::Sender;

pub mod observer;

#[cfg(test)]
mod test;

pub use observer::IngestionObserver;

/// A routed message, carrying the span it was routed under.
#[derive(Debug)]
pub enum SensorMessage {
    Data(tracing::Span, Payload),
    Register(tracing::Span, Payload),
    Status(tracing::Span, Payload),
}

impl SensorMessage {
    pub fn span(&self) -> &tracing::Span {
        match self {
            SensorMessage::Data(span, _)
            | SensorMessage::Register(span, _)
            | SensorMessage::Status(span, _) => span,
        }
    }
}

pub type SensorSender = Sender<(String, SensorMessage)>;
