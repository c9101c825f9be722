use crate::domain::device::DeviceId;
use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Storage class of a typed sensor value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Void,
    String,
    Bool,
    Int,
    Float,
    Double,
    Timestamp,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Void => "void",
            ValueKind::String => "string",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor value after schema conversion
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Void,
    String(String),
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Timestamp(DateTime<Utc>),
}

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::Void => ValueKind::Void,
            TypedValue::String(_) => ValueKind::String,
            TypedValue::Bool(_) => ValueKind::Bool,
            TypedValue::Int(_) => ValueKind::Int,
            TypedValue::Float(_) => ValueKind::Float,
            TypedValue::Double(_) => ValueKind::Double,
            TypedValue::Timestamp(_) => ValueKind::Timestamp,
        }
    }
}

/// One telemetry record; append-only, keyed by (device, sensor, time)
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub device_id: DeviceId,
    pub sensor_name: String,
    pub recorded_at: DateTime<Utc>,
    pub value: TypedValue,
}

/// Repository trait for time-series sample storage
///
/// Writes are independent appends; implementations must tolerate concurrent
/// calls from many sessions without external coordination.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SampleRepository: Send + Sync {
    async fn insert_sample(&self, sample: &SensorSample) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_matches_variant() {
        assert_eq!(TypedValue::Int(3).kind(), ValueKind::Int);
        assert_eq!(TypedValue::Double(1.5).kind(), ValueKind::Double);
        assert_eq!(TypedValue::Void.kind().to_string(), "void");
    }
}
