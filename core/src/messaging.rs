use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::MessageError;
use crate::sensor::NewReading;

pub const SENSOR_TOPIC: &str = "sensor";
pub const DATA_TOPIC: &str = "data";
pub const MOISTURE_TOPIC: &str = "moisture";
pub const REGISTER_TOPIC: &str = "register";
pub const STATUS_TOPIC: &str = "status";

pub type Payload = Map<std::string::String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Readings, published under `data` or the legacy `moisture` endpoint.
    Data,
    Register,
    Status,
}

impl MessageKind {
    pub fn parse(endpoint: &str) -> Option<Self> {
        match endpoint {
            DATA_TOPIC | MOISTURE_TOPIC => Some(MessageKind::Data),
            REGISTER_TOPIC => Some(MessageKind::Register),
            STATUS_TOPIC => Some(MessageKind::Status),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageKind::Data => f.write_str(DATA_TOPIC),
            MessageKind::Register => f.write_str(REGISTER_TOPIC),
            MessageKind::Status => f.write_str(STATUS_TOPIC),
        }
    }
}

/// The `sensor/{sensor_id}/{endpoint}` parts of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorTopic<'a> {
    pub sensor_id: &'a str,
    pub endpoint: &'a str,
}

impl<'a> SensorTopic<'a> {
    /// Splits a topic on `/`. Segments past the third are ignored.
    pub fn parse(topic: &'a str) -> Result<Self, MessageError> {
        let path: Vec<&str> = topic.split('/').collect();
        if path.len() < 3 {
            return Err(MessageError::MalformedTopic(topic.to_owned()));
        }
        Ok(SensorTopic {
            sensor_id: path[1],
            endpoint: path[2],
        })
    }

    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::parse(self.endpoint)
    }
}

/// Topic filters the ingestion client subscribes to.
pub fn topic_filters(legacy_moisture: bool) -> Vec<std::string::String> {
    let mut endpoints = vec![DATA_TOPIC, REGISTER_TOPIC, STATUS_TOPIC];
    if legacy_moisture {
        endpoints.push(MOISTURE_TOPIC);
    }
    endpoints
        .into_iter()
        .map(|endpoint| format!("{}/+/{}", SENSOR_TOPIC, endpoint))
        .collect()
}

/// Parses raw payload bytes into a JSON object.
pub fn parse_payload(payload: &[u8]) -> Result<Payload, MessageError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MessageError::MalformedPayload(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(e) => Err(MessageError::MalformedPayload(e.to_string())),
    }
}

/// The fields of a `data` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingMessage {
    pub moisture: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl ReadingMessage {
    pub fn from_payload(payload: &Payload) -> Result<Self, MessageError> {
        let moisture = match payload.get("moisture").or_else(|| payload.get("value")) {
            None | Some(Value::Null) => return Err(MessageError::MissingField("moisture")),
            Some(value) => value.as_f64().ok_or_else(|| {
                MessageError::MalformedPayload(format!(
                    "moisture must be a number, got {}",
                    json_type(value)
                ))
            })?,
        };

        let timestamp = match payload.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(parse_timestamp(raw)?),
            Some(other) => {
                return Err(MessageError::MalformedPayload(format!(
                    "timestamp must be a string, got {}",
                    json_type(other)
                )))
            }
        };

        Ok(ReadingMessage {
            moisture,
            timestamp,
            temperature: optional_number(payload, "temperature")?,
            humidity: optional_number(payload, "humidity")?,
        })
    }

    /// Builds the row to insert, stamping `now` when the source sent no time.
    pub fn into_reading(self, sensor_id: &str, now: DateTime<Utc>) -> NewReading {
        NewReading {
            sensor_id: sensor_id.to_owned(),
            moisture_value: self.moisture,
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

fn optional_number(payload: &Payload, field: &str) -> Result<Option<f64>, MessageError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            MessageError::MalformedPayload(format!(
                "{} must be a number, got {}",
                field,
                json_type(value)
            ))
        }),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MessageError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .map_err(|_| MessageError::MalformedPayload(format!("invalid timestamp: {}", raw)))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
