use common::domain::ValueKind;
use std::fmt;
use std::str::FromStr;

/// Declared wire type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Void,
    String,
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    Datetime,
}

impl Datatype {
    /// Canonical name, used when a descriptor is serialized back for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Datatype::Void => "void",
            Datatype::String => "string",
            Datatype::Bool => "bool",
            Datatype::Int8 => "int8",
            Datatype::Uint8 => "uint8",
            Datatype::Int16 => "int16",
            Datatype::Uint16 => "uint16",
            Datatype::Int32 => "int32",
            Datatype::Uint32 => "uint32",
            Datatype::Float32 => "float32",
            Datatype::Float64 => "float64",
            Datatype::Datetime => "datetime",
        }
    }

    /// Storage class samples of this type are written as
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Datatype::Void => ValueKind::Void,
            Datatype::String => ValueKind::String,
            Datatype::Bool => ValueKind::Bool,
            Datatype::Int8
            | Datatype::Uint8
            | Datatype::Int16
            | Datatype::Uint16
            | Datatype::Int32
            | Datatype::Uint32 => ValueKind::Int,
            Datatype::Float32 => ValueKind::Float,
            Datatype::Float64 => ValueKind::Double,
            Datatype::Datetime => ValueKind::Timestamp,
        }
    }

    /// Inclusive bounds for the integer types
    pub(crate) fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            Datatype::Int8 => Some((i8::MIN.into(), i8::MAX.into())),
            Datatype::Uint8 => Some((0, u8::MAX.into())),
            Datatype::Int16 => Some((i16::MIN.into(), i16::MAX.into())),
            Datatype::Uint16 => Some((0, u16::MAX.into())),
            Datatype::Int32 => Some((i32::MIN.into(), i32::MAX.into())),
            Datatype::Uint32 => Some((0, u32::MAX.into())),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.value_kind(), ValueKind::Int | ValueKind::Float | ValueKind::Double)
    }
}

impl FromStr for Datatype {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "void" => Ok(Datatype::Void),
            "string" => Ok(Datatype::String),
            "bool" | "boolean" => Ok(Datatype::Bool),
            "int8" => Ok(Datatype::Int8),
            "uint8" => Ok(Datatype::Uint8),
            "int16" => Ok(Datatype::Int16),
            "uint16" => Ok(Datatype::Uint16),
            "int32" | "int" | "integer" => Ok(Datatype::Int32),
            "uint32" => Ok(Datatype::Uint32),
            "float32" | "float" => Ok(Datatype::Float32),
            "float64" | "double" => Ok(Datatype::Float64),
            "datetime" | "timestamp" => Ok(Datatype::Datetime),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_collapse() {
        assert_eq!("float".parse::<Datatype>(), Ok(Datatype::Float32));
        assert_eq!("double".parse::<Datatype>(), Ok(Datatype::Float64));
        assert_eq!("integer".parse::<Datatype>(), Ok(Datatype::Int32));
        assert_eq!("boolean".parse::<Datatype>(), Ok(Datatype::Bool));
        assert_eq!("timestamp".parse::<Datatype>(), Ok(Datatype::Datetime));
    }

    #[test]
    fn test_unknown_type() {
        assert!("decimal".parse::<Datatype>().is_err());
        assert!("Float".parse::<Datatype>().is_err());
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(Datatype::Uint16.value_kind(), ValueKind::Int);
        assert_eq!(Datatype::Float32.value_kind(), ValueKind::Float);
        assert_eq!(Datatype::Datetime.value_kind(), ValueKind::Timestamp);
        assert!(!Datatype::Bool.is_numeric());
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(Datatype::Uint8.integer_range(), Some((0, 255)));
        assert_eq!(Datatype::Int16.integer_range(), Some((-32768, 32767)));
        assert_eq!(Datatype::Float64.integer_range(), None);
    }
}
