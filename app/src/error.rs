use soilsense_core::MessageError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DBError {
    #[error(transparent)]
    SQLError(#[from] sqlx::Error),
    #[error("Sensor {0} does not exist")]
    ForeignKey(std::string::String),
}

#[derive(Debug, Error)]
pub enum MQTTError {
    #[error("Invalid broker url: {0}")]
    Url(std::string::String),
    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),
    #[error("Client was shut down")]
    Terminated,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid {
        key: &'static str,
        value: std::string::String,
    },
}

/// Which of the two authorization layers rejected a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCheck {
    TopicPrefix,
    AllowList,
}

impl fmt::Display for AuthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthCheck::TopicPrefix => f.write_str("topic prefix"),
            AuthCheck::AllowList => f.write_str("allow-list"),
        }
    }
}

/// Everything that can make a single inbound message get dropped.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Malformed topic: {0}")]
    MalformedTopic(std::string::String),
    #[error("Malformed payload: {0}")]
    MalformedPayload(std::string::String),
    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),
    #[error("Unauthorized sensor {sensor_id} rejected by {check} check")]
    UnauthorizedSensor {
        sensor_id: std::string::String,
        check: AuthCheck,
    },
    #[error("Persistence failed: {0}")]
    PersistenceFailure(#[from] DBError),
    #[error("Ingestion queue is full")]
    QueueFull,
}

impl From<MessageError> for IngestError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::MalformedTopic(topic) => IngestError::MalformedTopic(topic),
            MessageError::MalformedPayload(msg) => IngestError::MalformedPayload(msg),
            MessageError::MissingField(field) => IngestError::MissingRequiredField(field),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("sensorId and action are required")]
    MissingArgument,
    #[error("Action must be 'add' or 'remove', got '{0}'")]
    InvalidAction(std::string::String),
    #[error("Invalid sensor id: '{0}'")]
    InvalidSensorId(std::string::String),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed installing log subscriber: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    #[error(transparent)]
    Database(#[from] DBError),
    #[error(transparent)]
    Mqtt(#[from] MQTTError),
    #[error("Failed binding admin server: {0}")]
    Bind(#[from] warp::Error),
    #[error("Failed installing signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
