use crate::Datatype;
use thiserror::Error;

pub type SddlResult<T> = Result<T, SddlError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SddlError {
    #[error("descriptor must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("property name must not be empty")]
    EmptyPropertyName,

    #[error("property '{name}': {reason}")]
    InvalidProperty { name: String, reason: String },

    #[error("property '{name}' declares unknown type '{type_name}'")]
    UnknownType { name: String, type_name: String },

    #[error("sensor not found: {0}")]
    SensorNotFound(String),

    #[error("property '{0}' is a control, not a sensor")]
    NotASensor(String),

    #[error("sensor '{sensor}' expects {expected}, got {found}")]
    TypeMismatch {
        sensor: String,
        expected: Datatype,
        found: &'static str,
    },

    #[error("sensor '{sensor}' value {value} is out of range")]
    OutOfRange { sensor: String, value: String },

    #[error("sensor '{sensor}' timestamp is not RFC 3339: {reason}")]
    InvalidTimestamp { sensor: String, reason: String },
}
