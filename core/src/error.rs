use std::error;
use std::fmt;

/// Reasons a single inbound message can not be turned into domain data.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageError {
    MalformedTopic(std::string::String),
    MalformedPayload(std::string::String),
    MissingField(&'static str),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageError::MalformedTopic(topic) => write!(f, "Malformed topic: {}", topic),
            MessageError::MalformedPayload(msg) => write!(f, "Malformed payload: {}", msg),
            MessageError::MissingField(field) => write!(f, "Missing required field: {}", field),
        }
    }
}

impl error::Error for MessageError {}
