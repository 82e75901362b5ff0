// MIT License - Copyright (c) 2026 Peter Wright
// Read-only property lookup, validation and value conversion

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{json, Value};

use super::catalog::{self, LinkedCommand};
use super::{Domain, Property, PropertyValue};
use crate::config::DeviceType;
use crate::error::{AirconError, Result};
use crate::protocol::WireWrite;

static AC_REGISTRY: LazyLock<PropertyRegistry> =
    LazyLock::new(|| PropertyRegistry::new(DeviceType::Ac, catalog::AC, catalog::AC_LINKS));
static HUMIDIFIER_REGISTRY: LazyLock<PropertyRegistry> =
    LazyLock::new(|| PropertyRegistry::new(DeviceType::Humidifier, catalog::HUMIDIFIER, &[]));
static FGL_REGISTRY: LazyLock<PropertyRegistry> =
    LazyLock::new(|| PropertyRegistry::new(DeviceType::Fgl, catalog::FGL, &[]));
static FGL_B_REGISTRY: LazyLock<PropertyRegistry> =
    LazyLock::new(|| PropertyRegistry::new(DeviceType::FglB, catalog::FGL_B, &[]));

/// Authoritative catalog of the properties one device type exposes.
///
/// Registries are process-wide and immutable; obtain one with
/// [`PropertyRegistry::for_device_type`].
#[derive(Debug)]
pub struct PropertyRegistry {
    device_type: DeviceType,
    properties: &'static [Property],
    links: &'static [LinkedCommand],
    index: HashMap<&'static str, usize>,
}

impl PropertyRegistry {
    pub fn new(
        device_type: DeviceType,
        properties: &'static [Property],
        links: &'static [LinkedCommand],
    ) -> Self {
        let index = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name, i))
            .collect();
        Self {
            device_type,
            properties,
            links,
            index,
        }
    }

    pub fn for_device_type(device_type: DeviceType) -> &'static PropertyRegistry {
        match device_type {
            DeviceType::Ac => &AC_REGISTRY,
            DeviceType::Humidifier => &HUMIDIFIER_REGISTRY,
            DeviceType::Fgl => &FGL_REGISTRY,
            DeviceType::FglB => &FGL_B_REGISTRY,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn properties(&self) -> impl Iterator<Item = &'static Property> + '_ {
        self.properties.iter()
    }

    pub fn writable(&self) -> impl Iterator<Item = &'static Property> + '_ {
        self.properties.iter().filter(|p| p.is_writable())
    }

    pub fn names(&self) -> Vec<String> {
        self.properties.iter().map(|p| p.name.to_string()).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<&'static Property> {
        self.index
            .get(name)
            .map(|&i| &self.properties[i])
            .ok_or_else(|| AirconError::UnknownProperty {
                name: name.to_string(),
            })
    }

    /// Validate a value the gateway intends to write.
    pub fn validate(&self, name: &str, value: &PropertyValue) -> Result<&'static Property> {
        let property = self.lookup(name)?;
        if !property.is_writable() {
            return Err(AirconError::ReadOnly {
                name: name.to_string(),
            });
        }
        check_domain(property, value)?;
        Ok(property)
    }

    /// Validate a value reported by the device. Sensors are allowed here.
    pub fn validate_observation(
        &self,
        name: &str,
        value: &PropertyValue,
    ) -> Result<&'static Property> {
        let property = self.lookup(name)?;
        check_domain(property, value)?;
        Ok(property)
    }

    /// Parse a raw string from a bridge into a typed value.
    ///
    /// Enum names are case-insensitive. A decimal string for an integer
    /// property is rounded, since home-automation hubs often send converted
    /// temperatures such as `"72.5"`.
    pub fn parse(&self, name: &str, raw: &str) -> Result<PropertyValue> {
        let property = self.lookup(name)?;
        let raw = raw.trim();
        let invalid = |reason: &str| AirconError::Validation {
            name: name.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let value = match property.domain {
            Domain::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => PropertyValue::Boolean(true),
                "false" | "0" | "off" => PropertyValue::Boolean(false),
                _ => return Err(invalid("expected a boolean")),
            },
            Domain::Integer { .. } => match raw.parse::<i64>() {
                Ok(v) => PropertyValue::Integer(v),
                Err(_) if raw.contains('.') => {
                    let v: f64 = raw.parse().map_err(|_| invalid("expected an integer"))?;
                    if !v.is_finite() {
                        return Err(invalid("expected an integer"));
                    }
                    PropertyValue::Integer(v.round() as i64)
                }
                Err(_) => return Err(invalid("expected an integer")),
            },
            Domain::Decimal { .. } => match raw.parse::<f64>() {
                Ok(v) => PropertyValue::Decimal(v),
                Err(_) => return Err(invalid("expected a number")),
            },
            Domain::Enum(_) => PropertyValue::Enum(raw.to_ascii_uppercase()),
        };

        check_domain(property, &value)?;
        Ok(value)
    }

    /// Convert a validated value into its wire representation.
    pub fn to_wire(&self, name: &str, value: &PropertyValue) -> Result<WireWrite> {
        let property = self.validate(name, value)?;
        let wire_value = match value {
            PropertyValue::Boolean(v) => json!(v),
            PropertyValue::Integer(v) => json!(v),
            PropertyValue::Decimal(v) => json!(v),
            PropertyValue::Enum(choice) => {
                let code = property
                    .choice_by_name(choice)
                    .map(|c| c.code)
                    .ok_or_else(|| AirconError::Validation {
                        name: name.to_string(),
                        value: choice.clone(),
                        reason: "unknown choice".into(),
                    })?;
                json!(code)
            }
        };
        Ok(WireWrite {
            name: name.to_string(),
            base_type: property.wire,
            value: wire_value,
        })
    }

    /// Convert a value reported by the device into a typed, validated value.
    pub fn from_wire(&self, name: &str, raw: &Value) -> Result<PropertyValue> {
        let property = self.lookup(name)?;
        let invalid = |reason: &str| AirconError::Validation {
            name: name.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        let as_code = || raw.as_i64().or_else(|| raw.as_bool().map(i64::from));

        let value = match property.domain {
            Domain::Boolean => match as_code() {
                Some(0) => PropertyValue::Boolean(false),
                Some(1) => PropertyValue::Boolean(true),
                _ => return Err(invalid("expected a boolean")),
            },
            Domain::Integer { .. } => {
                PropertyValue::Integer(as_code().ok_or_else(|| invalid("expected an integer"))?)
            }
            Domain::Decimal { .. } => {
                PropertyValue::Decimal(raw.as_f64().ok_or_else(|| invalid("expected a number"))?)
            }
            Domain::Enum(_) => {
                let code = as_code().ok_or_else(|| invalid("expected an enum code"))?;
                let choice = property
                    .choice_by_code(code)
                    .ok_or_else(|| invalid("unknown enum code"))?;
                PropertyValue::enumerated(choice.name)
            }
        };
        check_domain(property, &value)?;
        Ok(value)
    }

    /// Commands that must accompany `name = value`, in issue order.
    pub fn linked_commands(&self, name: &str, value: &PropertyValue) -> Vec<(&'static str, PropertyValue)> {
        self.links
            .iter()
            .filter(|link| link.trigger == name && *value == link.value)
            .flat_map(|link| link.follow_ups.iter())
            .map(|(n, v)| (*n, PropertyValue::enumerated(*v)))
            .collect()
    }
}

fn check_domain(property: &Property, value: &PropertyValue) -> Result<()> {
    property.check(value).map_err(|reason| AirconError::Validation {
        name: property.name.to_string(),
        value: value.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::WireType;

    fn ac() -> &'static PropertyRegistry {
        PropertyRegistry::for_device_type(DeviceType::Ac)
    }

    #[test]
    fn test_lookup() {
        let p = ac().lookup("t_power").unwrap();
        assert!(p.is_writable());
        assert!(matches!(
            ac().lookup("t_warp_drive"),
            Err(AirconError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_registries_differ_per_device_type() {
        let fgl = PropertyRegistry::for_device_type(DeviceType::Fgl);
        assert!(fgl.lookup("operation_mode").is_ok());
        assert!(fgl.lookup("t_power").is_err());
        let humidifier = PropertyRegistry::for_device_type(DeviceType::Humidifier);
        assert!(humidifier.lookup("mistSt").is_ok());
        assert_eq!(humidifier.device_type(), DeviceType::Humidifier);
    }

    #[test]
    fn test_validate_rejects_read_only() {
        let err = ac()
            .validate("f_temp_in", &PropertyValue::Decimal(70.0))
            .unwrap_err();
        assert!(matches!(err, AirconError::ReadOnly { .. }));
        assert!(err.is_validation());
        // The same value is fine as an observation
        assert!(
            ac()
                .validate_observation("f_temp_in", &PropertyValue::Decimal(70.0))
                .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_out_of_domain() {
        assert!(ac().validate("t_temp", &PropertyValue::Integer(72)).is_ok());
        assert!(matches!(
            ac().validate("t_temp", &PropertyValue::Integer(400)),
            Err(AirconError::Validation { .. })
        ));
        assert!(matches!(
            ac().validate("t_work_mode", &PropertyValue::enumerated("TURBO")),
            Err(AirconError::Validation { .. })
        ));
    }

    #[test]
    fn test_parse_enum_case_insensitive() {
        assert_eq!(ac().parse("t_power", "on").unwrap(), PropertyValue::enumerated("ON"));
        assert_eq!(
            ac().parse("t_fan_speed", "Medium").unwrap(),
            PropertyValue::enumerated("MEDIUM")
        );
        assert!(ac().parse("t_fan_speed", "ludicrous").is_err());
    }

    #[test]
    fn test_parse_rounds_decimal_integer() {
        assert_eq!(ac().parse("t_temp", "72.5").unwrap(), PropertyValue::Integer(73));
        assert_eq!(ac().parse("t_temp", "71.4").unwrap(), PropertyValue::Integer(71));
        assert_eq!(ac().parse("t_temp", " 70 ").unwrap(), PropertyValue::Integer(70));
        assert!(ac().parse("t_temp", "warm").is_err());
    }

    #[test]
    fn test_parse_boolean() {
        assert_eq!(
            ac().parse("t_display_power", "true").unwrap(),
            PropertyValue::Boolean(true)
        );
        assert_eq!(
            ac().parse("t_display_power", "0").unwrap(),
            PropertyValue::Boolean(false)
        );
        assert!(ac().parse("t_display_power", "maybe").is_err());
    }

    #[test]
    fn test_to_wire_uses_enum_codes() {
        let write = ac().to_wire("t_fan_speed", &PropertyValue::enumerated("HIGH")).unwrap();
        assert_eq!(write.base_type, WireType::Integer);
        assert_eq!(write.value, json!(8));

        let write = ac().to_wire("t_backlight", &PropertyValue::enumerated("OFF")).unwrap();
        assert_eq!(write.base_type, WireType::Boolean);
        assert_eq!(write.value, json!(1));
    }

    #[test]
    fn test_to_wire_refuses_sensors() {
        assert!(
            ac()
                .to_wire("f_humidity", &PropertyValue::Integer(40))
                .is_err()
        );
    }

    #[test]
    fn test_from_wire() {
        assert_eq!(
            ac().from_wire("t_power", &json!(1)).unwrap(),
            PropertyValue::enumerated("ON")
        );
        assert_eq!(
            ac().from_wire("t_power", &json!(false)).unwrap(),
            PropertyValue::enumerated("OFF")
        );
        assert_eq!(
            ac().from_wire("f_temp_in", &json!(71.5)).unwrap(),
            PropertyValue::Decimal(71.5)
        );
        assert_eq!(
            ac().from_wire("f_filterclean", &json!(1)).unwrap(),
            PropertyValue::Boolean(true)
        );
        assert!(ac().from_wire("t_work_mode", &json!(42)).is_err());
        assert!(ac().from_wire("f_humidity", &json!(140)).is_err());
    }

    #[test]
    fn test_linked_commands_for_fast_heat() {
        let links = ac().linked_commands("t_temp_heatcold", &PropertyValue::enumerated("ON"));
        let names: Vec<&str> = links.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["t_fan_speed", "t_fan_mute", "t_sleep", "t_temp_eight"]);
        assert!(
            ac().linked_commands("t_temp_heatcold", &PropertyValue::enumerated("OFF"))
                .is_empty()
        );
        assert!(
            ac().linked_commands("t_power", &PropertyValue::enumerated("ON"))
                .is_empty()
        );
    }
}
