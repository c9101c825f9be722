use crate::descriptor::json_type_name;
use crate::{Datatype, SddlError, SddlResult, SensorDef};
use chrono::{DateTime, Utc};
use common::domain::TypedValue;
use serde_json::Value;

pub(crate) fn convert_value(def: &SensorDef, raw: &Value) -> SddlResult<TypedValue> {
    let mismatch = || SddlError::TypeMismatch {
        sensor: def.name.clone(),
        expected: def.datatype,
        found: json_type_name(raw),
    };
    let out_of_range = || SddlError::OutOfRange {
        sensor: def.name.clone(),
        value: raw.to_string(),
    };

    let value = match def.datatype {
        Datatype::Void => match raw {
            Value::Null => TypedValue::Void,
            _ => return Err(mismatch()),
        },
        Datatype::String => match raw {
            Value::String(s) => TypedValue::String(s.clone()),
            _ => return Err(mismatch()),
        },
        Datatype::Bool => match raw {
            Value::Bool(b) => TypedValue::Bool(*b),
            _ => return Err(mismatch()),
        },
        Datatype::Datetime => match raw {
            Value::String(s) => {
                let parsed = DateTime::parse_from_rfc3339(s).map_err(|e| {
                    SddlError::InvalidTimestamp {
                        sensor: def.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                TypedValue::Timestamp(parsed.with_timezone(&Utc))
            }
            _ => return Err(mismatch()),
        },
        Datatype::Float32 => {
            let n = raw.as_f64().ok_or_else(mismatch)?;
            if n.abs() > f64::from(f32::MAX) {
                return Err(out_of_range());
            }
            TypedValue::Float(n as f32)
        }
        Datatype::Float64 => TypedValue::Double(raw.as_f64().ok_or_else(mismatch)?),
        integer => {
            let Value::Number(n) = raw else {
                return Err(mismatch());
            };
            let (min, max) = integer.integer_range().ok_or_else(mismatch)?;
            let v = integral(n).ok_or_else(mismatch)?;
            if v < i128::from(min) || v > i128::from(max) {
                return Err(out_of_range());
            }
            // range checked above against an i64 window
            TypedValue::Int(v as i64)
        }
    };

    check_bounds(def, raw, &value).map_err(|_| out_of_range())?;
    Ok(value)
}

/// Integral value of a JSON number; `3.0` counts, `3.5` does not
fn integral(n: &serde_json::Number) -> Option<i128> {
    if let Some(v) = n.as_i64() {
        return Some(v.into());
    }
    if let Some(v) = n.as_u64() {
        return Some(v.into());
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e18 {
        Some(f as i128)
    } else {
        None
    }
}

fn check_bounds(def: &SensorDef, raw: &Value, value: &TypedValue) -> Result<(), ()> {
    let n = match value {
        TypedValue::Int(v) => *v as f64,
        TypedValue::Float(_) | TypedValue::Double(_) => raw.as_f64().ok_or(())?,
        _ => return Ok(()),
    };
    if def.min_value.is_some_and(|min| n < min) || def.max_value.is_some_and(|max| n > max) {
        return Err(());
    }
    Ok(())
}
