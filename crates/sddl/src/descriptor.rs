use crate::{Datatype, SddlError, SddlResult};
use common::domain::TypedValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Whether a property reports values or accepts them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyKind {
    #[default]
    Sensor,
    Control,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Sensor => "sensor",
            PropertyKind::Control => "control",
        }
    }
}

/// One declared property of a device
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDef {
    pub name: String,
    pub datatype: Datatype,
    pub kind: PropertyKind,
    pub description: Option<String>,
    pub units: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

impl SensorDef {
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            kind: PropertyKind::Sensor,
            description: None,
            units: None,
            min_value: None,
            max_value: None,
        }
    }

    /// Convert a raw wire value to the declared type.
    ///
    /// Mismatched JSON types are rejected, never coerced.
    pub fn convert(&self, raw: &Value) -> SddlResult<TypedValue> {
        crate::convert::convert_value(self, raw)
    }

    fn from_json(name: &str, definition: &Value) -> SddlResult<Self> {
        let invalid = |reason: &str| SddlError::InvalidProperty {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let fields = definition
            .as_object()
            .ok_or_else(|| invalid("definition must be an object"))?;

        let type_name = match fields.get("type") {
            Some(Value::String(t)) => t,
            Some(_) => return Err(invalid("'type' must be a string")),
            None => return Err(invalid("missing 'type'")),
        };
        let datatype = type_name
            .parse::<Datatype>()
            .map_err(|_| SddlError::UnknownType {
                name: name.to_string(),
                type_name: type_name.clone(),
            })?;

        let kind = match fields.get("kind") {
            None => PropertyKind::Sensor,
            Some(Value::String(k)) if k == "sensor" => PropertyKind::Sensor,
            Some(Value::String(k)) if k == "control" => PropertyKind::Control,
            Some(_) => return Err(invalid("'kind' must be \"sensor\" or \"control\"")),
        };

        let text = |key: &str| -> SddlResult<Option<String>> {
            match fields.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(invalid(&format!("'{}' must be a string", key))),
            }
        };
        let bound = |key: &str| -> SddlResult<Option<f64>> {
            match fields.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Number(n)) => Ok(n.as_f64()),
                Some(_) => Err(invalid(&format!("'{}' must be a number", key))),
            }
        };

        let min_value = bound("min_value")?;
        let max_value = bound("max_value")?;
        if (min_value.is_some() || max_value.is_some()) && !datatype.is_numeric() {
            return Err(invalid("bounds are only allowed on numeric types"));
        }
        if let (Some(min), Some(max)) = (min_value, max_value) {
            if min > max {
                return Err(invalid("'min_value' exceeds 'max_value'"));
            }
        }

        Ok(Self {
            name: name.to_string(),
            datatype,
            kind,
            description: text("description")?,
            units: text("units")?,
            min_value,
            max_value,
        })
    }

    fn to_json(&self) -> Value {
        let mut fields = Map::new();
        fields.insert("type".into(), Value::from(self.datatype.as_str()));
        fields.insert("kind".into(), Value::from(self.kind.as_str()));
        if let Some(description) = &self.description {
            fields.insert("description".into(), Value::from(description.as_str()));
        }
        if let Some(units) = &self.units {
            fields.insert("units".into(), Value::from(units.as_str()));
        }
        if let Some(min) = self.min_value {
            fields.insert("min_value".into(), Value::from(min));
        }
        if let Some(max) = self.max_value {
            fields.insert("max_value".into(), Value::from(max));
        }
        Value::Object(fields)
    }
}

/// A device's declared capability set, keyed by property name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Descriptor {
    properties: BTreeMap<String, SensorDef>,
}

impl Descriptor {
    /// Parse a descriptor from its JSON form.
    ///
    /// The whole descriptor is validated before anything is returned, so a
    /// rejected declaration never leaves a caller with a partial capability set.
    pub fn parse(raw: &Value) -> SddlResult<Self> {
        let entries = match raw {
            Value::Object(entries) => entries,
            other => return Err(SddlError::NotAnObject(json_type_name(other))),
        };

        let mut properties = BTreeMap::new();
        for (name, definition) in entries {
            if name.trim().is_empty() {
                return Err(SddlError::EmptyPropertyName);
            }
            properties.insert(name.clone(), SensorDef::from_json(name, definition)?);
        }

        Ok(Self { properties })
    }

    /// Find the sensor a frame field reports; controls are not sensors
    pub fn lookup_sensor(&self, name: &str) -> SddlResult<&SensorDef> {
        let def = self
            .properties
            .get(name)
            .ok_or_else(|| SddlError::SensorNotFound(name.to_string()))?;
        match def.kind {
            PropertyKind::Sensor => Ok(def),
            PropertyKind::Control => Err(SddlError::NotASensor(name.to_string())),
        }
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorDef> {
        self.properties
            .values()
            .filter(|def| def.kind == PropertyKind::Sensor)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Canonical JSON form, used to persist the descriptor with the device record
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.properties
                .iter()
                .map(|(name, def)| (name.clone(), def.to_json()))
                .collect(),
        )
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_descriptor() {
        let descriptor = Descriptor::parse(&json!({"temp": {"type": "float"}})).unwrap();

        let temp = descriptor.lookup_sensor("temp").unwrap();
        assert_eq!(temp.datatype, Datatype::Float32);
        assert_eq!(temp.kind, PropertyKind::Sensor);
        assert_eq!(descriptor.len(), 1);
    }

    #[test]
    fn test_parse_full_definition() {
        let descriptor = Descriptor::parse(&json!({
            "humidity": {
                "type": "uint8",
                "description": "relative humidity",
                "units": "%",
                "min_value": 0,
                "max_value": 100
            },
            "relay": {"type": "bool", "kind": "control"}
        }))
        .unwrap();

        let humidity = descriptor.lookup_sensor("humidity").unwrap();
        assert_eq!(humidity.units.as_deref(), Some("%"));
        assert_eq!(humidity.max_value, Some(100.0));
        assert_eq!(descriptor.len(), 2);
        assert_eq!(descriptor.sensors().count(), 1);
    }

    #[test]
    fn test_rejects_non_object() {
        assert_eq!(
            Descriptor::parse(&json!(["temp"])),
            Err(SddlError::NotAnObject("array"))
        );
    }

    #[test]
    fn test_rejects_missing_type() {
        let result = Descriptor::parse(&json!({"temp": {"units": "C"}}));
        assert!(matches!(result, Err(SddlError::InvalidProperty { name, .. }) if name == "temp"));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let result = Descriptor::parse(&json!({"temp": {"type": "decimal"}}));
        assert_eq!(
            result,
            Err(SddlError::UnknownType {
                name: "temp".to_string(),
                type_name: "decimal".to_string()
            })
        );
    }

    #[test]
    fn test_rejects_empty_name() {
        let result = Descriptor::parse(&json!({"": {"type": "int"}}));
        assert_eq!(result, Err(SddlError::EmptyPropertyName));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let result = Descriptor::parse(&json!({"t": {"type": "int", "min_value": 5, "max_value": 1}}));
        assert!(matches!(result, Err(SddlError::InvalidProperty { .. })));

        let result = Descriptor::parse(&json!({"s": {"type": "string", "max_value": 1}}));
        assert!(matches!(result, Err(SddlError::InvalidProperty { .. })));
    }

    #[test]
    fn test_one_bad_property_rejects_whole_descriptor() {
        let result = Descriptor::parse(&json!({
            "temp": {"type": "float"},
            "bad": {"type": "nope"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_lookup_sensor_errors() {
        let descriptor = Descriptor::parse(&json!({
            "relay": {"type": "bool", "kind": "control"}
        }))
        .unwrap();

        assert_eq!(
            descriptor.lookup_sensor("missing"),
            Err(SddlError::SensorNotFound("missing".to_string()))
        );
        assert_eq!(
            descriptor.lookup_sensor("relay"),
            Err(SddlError::NotASensor("relay".to_string()))
        );
    }

    #[test]
    fn test_canonical_json_reparses_to_same_descriptor() {
        let descriptor = Descriptor::parse(&json!({
            "temp": {"type": "double", "units": "C", "min_value": -40.0},
            "ts": {"type": "timestamp"}
        }))
        .unwrap();

        let canonical = descriptor.to_json();
        assert_eq!(canonical["temp"]["type"], "float64");
        assert_eq!(canonical["ts"]["type"], "datetime");
        assert_eq!(canonical["ts"]["kind"], "sensor");
        assert_eq!(Descriptor::parse(&canonical).unwrap(), descriptor);
    }
}
