// MIT License - Copyright (c) 2026 Peter Wright
// Property data model

pub mod catalog;
pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use registry::PropertyRegistry;

/// Whether a property can originate a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Reported by the device only (`f_*` on A/C units).
    Sensor,
    /// Writable from the gateway (`t_*` on A/C units).
    Control,
}

/// Logical type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Boolean,
    Integer,
    Decimal,
    Enum,
}

/// Base type tag carried next to a written value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    Boolean,
    Integer,
    Decimal,
}

/// One named member of an enumerated domain and its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumChoice {
    pub name: &'static str,
    pub code: i64,
}

impl EnumChoice {
    pub const fn new(name: &'static str, code: i64) -> Self {
        Self { name, code }
    }
}

/// The set of values a property accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    Boolean,
    /// Inclusive range
    Integer { min: i64, max: i64 },
    /// Inclusive range
    Decimal { min: f64, max: f64 },
    Enum(&'static [EnumChoice]),
}

/// Static metadata for one property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Property {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub wire: WireType,
    pub domain: Domain,
}

impl Property {
    pub const fn sensor(name: &'static str, wire: WireType, domain: Domain) -> Self {
        Self {
            name,
            kind: PropertyKind::Sensor,
            wire,
            domain,
        }
    }

    pub const fn control(name: &'static str, wire: WireType, domain: Domain) -> Self {
        Self {
            name,
            kind: PropertyKind::Control,
            wire,
            domain,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.domain {
            Domain::Boolean => ValueType::Boolean,
            Domain::Integer { .. } => ValueType::Integer,
            Domain::Decimal { .. } => ValueType::Decimal,
            Domain::Enum(_) => ValueType::Enum,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.kind == PropertyKind::Control
    }

    pub fn choice_by_name(&self, name: &str) -> Option<&'static EnumChoice> {
        match self.domain {
            Domain::Enum(choices) => choices.iter().find(|c| c.name == name),
            _ => None,
        }
    }

    pub fn choice_by_code(&self, code: i64) -> Option<&'static EnumChoice> {
        match self.domain {
            Domain::Enum(choices) => choices.iter().find(|c| c.code == code),
            _ => None,
        }
    }

    /// Check that `value` has this property's type and lies in its domain.
    /// Returns a human-readable reason on failure.
    pub fn check(&self, value: &PropertyValue) -> std::result::Result<(), String> {
        match (&self.domain, value) {
            (Domain::Boolean, PropertyValue::Boolean(_)) => Ok(()),
            (Domain::Integer { min, max }, PropertyValue::Integer(v)) => {
                if (*min..=*max).contains(v) {
                    Ok(())
                } else {
                    Err(format!("out of range {min}..={max}"))
                }
            }
            (Domain::Decimal { min, max }, PropertyValue::Decimal(v)) => {
                if v.is_finite() && *v >= *min && *v <= *max {
                    Ok(())
                } else {
                    Err(format!("out of range {min}..={max}"))
                }
            }
            (Domain::Enum(choices), PropertyValue::Enum(name)) => {
                if choices.iter().any(|c| c.name == name) {
                    Ok(())
                } else {
                    let names: Vec<&str> = choices.iter().map(|c| c.name).collect();
                    Err(format!("expected one of {}", names.join(", ")))
                }
            }
            (_, other) => Err(format!(
                "expected {:?}, got {:?}",
                self.value_type(),
                other.value_type()
            )),
        }
    }
}

/// A typed property value.
///
/// Serializes untagged, so a snapshot renders as plain JSON values:
/// `{"t_power": "ON", "t_temp": 72, "f_temp_in": 71.5, "f_filterclean": false}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Enum(String),
}

impl PropertyValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            PropertyValue::Boolean(_) => ValueType::Boolean,
            PropertyValue::Integer(_) => ValueType::Integer,
            PropertyValue::Decimal(_) => ValueType::Decimal,
            PropertyValue::Enum(_) => ValueType::Enum,
        }
    }

    pub fn enumerated(name: impl Into<String>) -> Self {
        PropertyValue::Enum(name.into())
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Boolean(v) => write!(f, "{}", v),
            PropertyValue::Integer(v) => write!(f, "{}", v),
            PropertyValue::Decimal(v) => write!(f, "{}", v),
            PropertyValue::Enum(v) => f.write_str(v),
        }
    }
}

impl PartialEq<&str> for PropertyValue {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, PropertyValue::Enum(name) if name == other)
    }
}
