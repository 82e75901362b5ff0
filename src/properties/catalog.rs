// MIT License - Copyright (c) 2026 Peter Wright
// Property catalogs per device type

use super::{Domain, EnumChoice, Property, WireType};

const U32_RANGE: Domain = Domain::Integer {
    min: 0,
    max: u32::MAX as i64,
};
const PERCENT: Domain = Domain::Integer { min: 0, max: 100 };

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

pub const POWER: &[EnumChoice] = &[EnumChoice::new("OFF", 0), EnumChoice::new("ON", 1)];
/// Same codes as [`POWER`]; separate names keep the catalogs readable.
pub const SWITCH: &[EnumChoice] = POWER;
/// Backlight dimmer is inverted on the wire
pub const DIMMER: &[EnumChoice] = &[EnumChoice::new("ON", 0), EnumChoice::new("OFF", 1)];
pub const TEMPERATURE_UNIT: &[EnumChoice] = &[
    EnumChoice::new("CELSIUS", 0),
    EnumChoice::new("FAHRENHEIT", 1),
];
pub const FAN_SPEED: &[EnumChoice] = &[
    EnumChoice::new("AUTO", 0),
    EnumChoice::new("LOWER", 5),
    EnumChoice::new("LOW", 6),
    EnumChoice::new("MEDIUM", 7),
    EnumChoice::new("HIGH", 8),
    EnumChoice::new("HIGHER", 9),
];
pub const SLEEP_MODE: &[EnumChoice] = &[
    EnumChoice::new("STOP", 0),
    EnumChoice::new("ONE", 1),
    EnumChoice::new("TWO", 2),
    EnumChoice::new("THREE", 3),
    EnumChoice::new("FOUR", 4),
];
pub const AC_WORK_MODE: &[EnumChoice] = &[
    EnumChoice::new("FAN", 0),
    EnumChoice::new("HEAT", 1),
    EnumChoice::new("COOL", 2),
    EnumChoice::new("DRY", 3),
    EnumChoice::new("AUTO", 4),
];
pub const HUMIDIFIER_WORK_MODE: &[EnumChoice] = &[
    EnumChoice::new("NORMAL", 0),
    EnumChoice::new("NIGHTLIGHT", 1),
    EnumChoice::new("SLEEP", 2),
];
pub const HUMIDIFIER_WATER: &[EnumChoice] =
    &[EnumChoice::new("OK", 0), EnumChoice::new("NO_WATER", 1)];
pub const MIST: &[EnumChoice] = &[
    EnumChoice::new("SMALL", 1),
    EnumChoice::new("MIDDLE", 2),
    EnumChoice::new("BIG", 3),
];
pub const FGL_OPERATION_MODE: &[EnumChoice] = &[
    EnumChoice::new("OFF", 0),
    EnumChoice::new("ON", 1),
    EnumChoice::new("AUTO", 2),
    EnumChoice::new("COOL", 3),
    EnumChoice::new("DRY", 4),
    EnumChoice::new("FAN", 5),
    EnumChoice::new("HEAT", 6),
];
pub const FGL_FAN_SPEED: &[EnumChoice] = &[
    EnumChoice::new("QUIET", 0),
    EnumChoice::new("LOW", 1),
    EnumChoice::new("MEDIUM", 2),
    EnumChoice::new("HIGH", 3),
    EnumChoice::new("AUTO", 4),
];

const fn flag(name: &'static str) -> Property {
    Property::sensor(name, WireType::Boolean, Domain::Boolean)
}

const fn on_off(name: &'static str) -> Property {
    Property::control(name, WireType::Boolean, Domain::Enum(POWER))
}

// ---------------------------------------------------------------------------
// Standard A/C
// ---------------------------------------------------------------------------

pub const AC: &[Property] = &[
    Property::sensor("f_electricity", WireType::Integer, U32_RANGE),
    flag("f_e_arkgrille"),
    flag("f_e_incoiltemp"),
    flag("f_e_incom"),
    flag("f_e_indisplay"),
    flag("f_e_ineeprom"),
    flag("f_e_inele"),
    flag("f_e_infanmotor"),
    flag("f_e_inhumidity"),
    flag("f_e_inkeys"),
    flag("f_e_inlow"),
    flag("f_e_intemp"),
    flag("f_e_invzero"),
    flag("f_e_outcoiltemp"),
    flag("f_e_outeeprom"),
    flag("f_e_outgastemp"),
    flag("f_e_outmachine2"),
    flag("f_e_outmachine"),
    flag("f_e_outtemp"),
    flag("f_e_outtemplow"),
    flag("f_e_push"),
    flag("f_filterclean"),
    Property::sensor("f_humidity", WireType::Integer, PERCENT),
    flag("f_power_display"),
    Property::sensor(
        "f_temp_in",
        WireType::Decimal,
        Domain::Decimal {
            min: -50.0,
            max: 150.0,
        },
    ),
    Property::sensor("f_voltage", WireType::Integer, U32_RANGE),
    Property::control("t_backlight", WireType::Boolean, Domain::Enum(DIMMER)),
    Property::control("t_control_value", WireType::Integer, U32_RANGE),
    Property::control("t_device_info", WireType::Boolean, Domain::Boolean),
    Property::control("t_display_power", WireType::Boolean, Domain::Boolean),
    on_off("t_eco"),
    on_off("t_fan_leftright"),
    on_off("t_fan_mute"),
    on_off("t_fan_power"),
    Property::control("t_fan_speed", WireType::Integer, Domain::Enum(FAN_SPEED)),
    Property::control("t_ftkt_start", WireType::Integer, U32_RANGE),
    on_off("t_power"),
    on_off("t_run_mode"),
    Property::control("t_setmulti_value", WireType::Integer, U32_RANGE),
    Property::control("t_sleep", WireType::Integer, Domain::Enum(SLEEP_MODE)),
    Property::control("t_temp", WireType::Integer, Domain::Integer { min: 16, max: 90 }),
    Property::control(
        "t_temptype",
        WireType::Boolean,
        Domain::Enum(TEMPERATURE_UNIT),
    ),
    on_off("t_temp_eight"),
    on_off("t_temp_heatcold"),
    Property::control("t_work_mode", WireType::Integer, Domain::Enum(AC_WORK_MODE)),
];

// ---------------------------------------------------------------------------
// Humidifier
// ---------------------------------------------------------------------------

pub const HUMIDIFIER: &[Property] = &[
    Property::control("humi", WireType::Integer, PERCENT),
    Property::control("mist", WireType::Integer, Domain::Enum(MIST)),
    Property::sensor("mistSt", WireType::Integer, Domain::Enum(POWER)),
    Property::sensor("realhumi", WireType::Integer, PERCENT),
    Property::sensor("remain", WireType::Integer, U32_RANGE),
    Property::control("switch", WireType::Boolean, Domain::Enum(SWITCH)),
    Property::sensor("temp", WireType::Integer, Domain::Integer { min: -50, max: 150 }),
    Property::control("timer", WireType::Integer, Domain::Integer { min: -1, max: 1440 }),
    Property::sensor("water", WireType::Boolean, Domain::Enum(HUMIDIFIER_WATER)),
    Property::control(
        "workmode",
        WireType::Integer,
        Domain::Enum(HUMIDIFIER_WORK_MODE),
    ),
];

// ---------------------------------------------------------------------------
// Fujitsu
// ---------------------------------------------------------------------------

const FGL_TEMPERATURE: Domain = Domain::Integer { min: 10, max: 32 };
const FGL_LOUVER: Domain = Domain::Integer { min: 0, max: 8 };

pub const FGL: &[Property] = &[
    Property::control(
        "operation_mode",
        WireType::Integer,
        Domain::Enum(FGL_OPERATION_MODE),
    ),
    Property::control("fan_speed", WireType::Integer, Domain::Enum(FGL_FAN_SPEED)),
    Property::control("adjust_temperature", WireType::Integer, FGL_TEMPERATURE),
    Property::control("af_vertical_direction", WireType::Integer, FGL_LOUVER),
    on_off("af_vertical_swing"),
    Property::control("af_horizontal_direction", WireType::Integer, FGL_LOUVER),
    on_off("af_horizontal_swing"),
    on_off("economy_mode"),
];

pub const FGL_B: &[Property] = &[
    Property::control(
        "operation_mode",
        WireType::Integer,
        Domain::Enum(FGL_OPERATION_MODE),
    ),
    Property::control("fan_speed", WireType::Integer, Domain::Enum(FGL_FAN_SPEED)),
    Property::control("adjust_temperature", WireType::Integer, FGL_TEMPERATURE),
    Property::control("af_vertical_move_step1", WireType::Integer, FGL_LOUVER),
    Property::control("af_horizontal_move_step1", WireType::Integer, FGL_LOUVER),
    on_off("economy_mode"),
];

// ---------------------------------------------------------------------------
// Linked commands
// ---------------------------------------------------------------------------

/// Writing `trigger = value` also issues each of `follow_ups`.
#[derive(Debug, Clone, Copy)]
pub struct LinkedCommand {
    pub trigger: &'static str,
    pub value: &'static str,
    pub follow_ups: &'static [(&'static str, &'static str)],
}

/// Fast cool/heat overrides fan, quiet, sleep and 8°C heat settings.
pub const AC_LINKS: &[LinkedCommand] = &[LinkedCommand {
    trigger: "t_temp_heatcold",
    value: "ON",
    follow_ups: &[
        ("t_fan_speed", "AUTO"),
        ("t_fan_mute", "OFF"),
        ("t_sleep", "STOP"),
        ("t_temp_eight", "OFF"),
    ],
}];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_unique() {
        for (label, catalog) in [("ac", AC), ("humidifier", HUMIDIFIER), ("fgl", FGL), ("fgl_b", FGL_B)] {
            let mut seen = HashSet::new();
            for p in catalog {
                assert!(seen.insert(p.name), "duplicate {} in {} catalog", p.name, label);
            }
        }
    }

    #[test]
    fn test_ac_sensor_and_control_prefixes() {
        for p in AC {
            if p.name.starts_with("f_") {
                assert!(!p.is_writable(), "{} should be read-only", p.name);
            } else {
                assert!(p.is_writable(), "{} should be writable", p.name);
            }
        }
    }

    #[test]
    fn test_linked_commands_reference_writable_properties() {
        for link in AC_LINKS {
            for (name, value) in link.follow_ups {
                let p = AC.iter().find(|p| p.name == *name).unwrap();
                assert!(p.is_writable());
                assert!(p.choice_by_name(value).is_some(), "{name}={value}");
            }
        }
    }
}
