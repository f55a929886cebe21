/**
 * Maps raw appliance fields to HVAC properties and property writes back to raw commands.
 *
 * Reads return `None` whenever a field they depend on hasn't been reported yet, so callers can
 * tell "unknown" apart from a real zero.
 */
use std::str::FromStr;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use crate::{
    config::DeviceConfig,
    fields::{self, Command, Field},
    status::RawStatus,
};

// Fixed calibration of the appliance's half-degree encoding
const OFFSET_STEP: f64 = 0.5;
const OFFSET_BIAS: f64 = 0.24;

/// Semantic speed value used for the appliance's automatic fan setting
pub const SPEED_AUTO: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Property {
    Power,
    CurrentTemperature,
    CurrentState,
    TargetState,
    Speed,
    Units,
    SwingMode,
    TargetTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperatingState {
    Idle,
    Heating,
    Cooling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetMode {
    Auto,
    Heat,
    Cool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Units {
    #[strum(to_string = "celsius", serialize = "c")]
    Celsius,
    #[strum(to_string = "fahrenheit", serialize = "f")]
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Temperature(f64),
    State(OperatingState),
    Mode(TargetMode),
    Speed(u8),
    Units(Units),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DerivationError {
    #[error("{0} is unknown until the device reports it")]
    Unknown(Property),
    #[error("{0} is read-only")]
    ReadOnly(Property),
    #[error("{value:?} is not a valid value for {property}")]
    InvalidValue { property: Property, value: Value },
    #[error("{value} is out of range for {property}")]
    OutOfRange { property: Property, value: f64 },
    #[error("failed to parse {input:?} as a value for {property}")]
    Parse { property: Property, input: String },
}

impl Property {
    pub fn read(self, status: &RawStatus, config: &DeviceConfig) -> Option<Value> {
        match self {
            Property::Power => power(status).map(Value::Bool),
            Property::CurrentTemperature => current_temperature(status, config).map(Value::Temperature),
            Property::CurrentState => current_state(status, config).map(Value::State),
            Property::TargetState => target_state(status).map(Value::Mode),
            Property::Speed => speed(status).map(Value::Speed),
            Property::Units => units(status).map(Value::Units),
            Property::SwingMode => swing_mode(status).map(Value::Bool),
            Property::TargetTemperature => target_temperature(status, config).map(Value::Temperature),
        }
    }

    pub fn get(self, status: &RawStatus, config: &DeviceConfig) -> Result<Value, DerivationError> {
        self.read(status, config).ok_or(DerivationError::Unknown(self))
    }

    /// The raw command to send, or `None` when the write changes nothing.
    pub fn write(
        self,
        value: Value,
        status: &RawStatus,
        config: &DeviceConfig,
    ) -> Result<Option<Command>, DerivationError> {
        match (self, value) {
            (Property::CurrentTemperature | Property::CurrentState, _) => {
                Err(DerivationError::ReadOnly(self))
            }
            (Property::Power, Value::Bool(on)) => Ok(set_power(on, status)),
            (Property::TargetState, Value::Mode(mode)) => Ok(set_target_state(mode, status, config)),
            (Property::Speed, Value::Speed(speed)) => set_speed(speed, status),
            (Property::Units, Value::Units(units)) => Ok(set_units(units, status)),
            (Property::SwingMode, Value::Bool(on)) => Ok(set_swing_mode(on, status)),
            (Property::TargetTemperature, Value::Temperature(temperature)) => {
                set_target_temperature(temperature, status, config)
            }
            (property, value) => Err(DerivationError::InvalidValue { property, value }),
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, Property::CurrentTemperature | Property::CurrentState)
    }

    /// The appliance doesn't echo these writes back right away, so the cached value has to be
    /// pushed to observers again.
    pub fn refreshes_display(self) -> bool {
        self == Property::Units
    }

    pub fn parse_value(self, input: &str) -> Result<Value, DerivationError> {
        let parse_error = || DerivationError::Parse {
            property: self,
            input: input.to_owned(),
        };
        let input = input.trim();

        match self {
            Property::CurrentTemperature | Property::CurrentState => Err(DerivationError::ReadOnly(self)),
            Property::Power | Property::SwingMode => match input.to_lowercase().as_str() {
                "on" | "true" | "1" => Ok(Value::Bool(true)),
                "off" | "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(parse_error()),
            },
            Property::TargetState => TargetMode::from_str(&input.to_lowercase())
                .map(Value::Mode)
                .map_err(|_| parse_error()),
            Property::Speed => input.parse().map(Value::Speed).map_err(|_| parse_error()),
            Property::Units => Units::from_str(&input.to_lowercase())
                .map(Value::Units)
                .map_err(|_| parse_error()),
            Property::TargetTemperature => input
                .parse()
                .map(Value::Temperature)
                .map_err(|_| parse_error()),
        }
    }
}

// NaN and infinities are as good as unknown
fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub fn power(status: &RawStatus) -> Option<bool> {
    match status.get(Field::Power)? {
        fields::power::ON => Some(true),
        fields::power::OFF => Some(false),
        _ => None,
    }
}

pub fn set_power(on: bool, status: &RawStatus) -> Option<Command> {
    if power(status) == Some(on) {
        return None;
    }
    let raw = if on { fields::power::ON } else { fields::power::OFF };
    Some(Command::new().with(Field::Power, raw))
}

pub fn target_temperature(status: &RawStatus, config: &DeviceConfig) -> Option<f64> {
    let whole = status.get(Field::TargetTemperature)? as f64;
    let offset = status.get(Field::TemperatureOffset)? as f64;
    let temperature = whole + OFFSET_STEP * (offset - 1.0) + OFFSET_BIAS;
    finite(temperature.min(config.maximum_target_temperature))
}

/// Splits a temperature into the raw whole degrees and the half-degree offset flag.
pub fn encode_target_temperature(temperature: f64) -> (i64, i64) {
    let whole = temperature.round();
    let offset = if temperature - whole >= 0.0 { 1 } else { 0 };
    (whole as i64, offset)
}

pub fn set_target_temperature(
    temperature: f64,
    status: &RawStatus,
    config: &DeviceConfig,
) -> Result<Option<Command>, DerivationError> {
    if !temperature.is_finite()
        || temperature < config.minimum_target_temperature
        || temperature > config.maximum_target_temperature
    {
        return Err(DerivationError::OutOfRange {
            property: Property::TargetTemperature,
            value: temperature,
        });
    }

    let (whole, offset) = encode_target_temperature(temperature);
    if status.get(Field::TargetTemperature) == Some(whole)
        && status.get(Field::TemperatureOffset) == Some(offset)
    {
        return Ok(None);
    }

    Ok(Some(
        Command::new()
            .with(Field::TargetTemperature, whole)
            .with(Field::TemperatureOffset, offset),
    ))
}

pub fn current_temperature(status: &RawStatus, config: &DeviceConfig) -> Option<f64> {
    if config.fake_sensor {
        return target_temperature(status, config);
    }
    finite(status.get(Field::Temperature)? as f64 - config.sensor_offset)
}

pub fn current_state(status: &RawStatus, config: &DeviceConfig) -> Option<OperatingState> {
    let mode = status.get(Field::Mode)?;
    let target = status.get(Field::TargetTemperature)? as f64;

    if config.fake_sensor {
        return Some(match mode {
            fields::mode::COOL => OperatingState::Cooling,
            fields::mode::HEAT => OperatingState::Heating,
            _ => OperatingState::Idle,
        });
    }

    let ambient = current_temperature(status, config)?;
    let cools = matches!(mode, fields::mode::AUTO | fields::mode::COOL);
    let heats = matches!(mode, fields::mode::AUTO | fields::mode::HEAT);

    Some(if target < ambient && cools {
        OperatingState::Cooling
    } else if target > ambient && heats {
        OperatingState::Heating
    } else {
        OperatingState::Idle
    })
}

pub fn target_state(status: &RawStatus) -> Option<TargetMode> {
    Some(match status.get(Field::Mode)? {
        fields::mode::AUTO => TargetMode::Auto,
        fields::mode::HEAT => TargetMode::Heat,
        // Dry, fan and anything unrecognized
        _ => TargetMode::Cool,
    })
}

pub fn set_target_state(mode: TargetMode, status: &RawStatus, config: &DeviceConfig) -> Option<Command> {
    if target_state(status) == Some(mode) {
        return None;
    }

    let raw = match mode {
        TargetMode::Auto => fields::mode::AUTO,
        TargetMode::Heat => fields::mode::HEAT,
        TargetMode::Cool => fields::mode::COOL,
    };
    let mut command = Command::new().with(Field::Mode, raw);
    if config.x_fan && status.get(Field::XFan) != Some(fields::xfan::ON) {
        command.set(Field::XFan, fields::xfan::ON);
    }
    Some(command)
}

pub fn speed(status: &RawStatus) -> Option<u8> {
    match status.get(Field::Speed)? {
        fields::speed::AUTO => Some(SPEED_AUTO),
        raw @ fields::speed::LOW..=fields::speed::HIGH => Some(raw as u8),
        _ => None,
    }
}

pub fn set_speed(value: u8, status: &RawStatus) -> Result<Option<Command>, DerivationError> {
    // 0 is what sliders report when dragged to the bottom, the power property turns the unit off
    if value == 0 {
        return Ok(None);
    }
    if value > SPEED_AUTO {
        return Err(DerivationError::OutOfRange {
            property: Property::Speed,
            value: value as f64,
        });
    }
    if speed(status) == Some(value) {
        return Ok(None);
    }

    let raw = if value == SPEED_AUTO {
        fields::speed::AUTO
    } else {
        value as i64
    };
    Ok(Some(Command::new().with(Field::Speed, raw)))
}

pub fn units(status: &RawStatus) -> Option<Units> {
    match status.get(Field::Units)? {
        fields::units::CELSIUS => Some(Units::Celsius),
        fields::units::FAHRENHEIT => Some(Units::Fahrenheit),
        _ => None,
    }
}

pub fn set_units(value: Units, status: &RawStatus) -> Option<Command> {
    if units(status) == Some(value) {
        return None;
    }
    let raw = match value {
        Units::Celsius => fields::units::CELSIUS,
        Units::Fahrenheit => fields::units::FAHRENHEIT,
    };
    Some(Command::new().with(Field::Units, raw))
}

pub fn swing_mode(status: &RawStatus) -> Option<bool> {
    match status.get(Field::SwingMode)? {
        fields::swing::OFF => Some(false),
        // Any of the fixed-position or partial swing codes still counts as swinging
        _ => Some(true),
    }
}

pub fn set_swing_mode(on: bool, status: &RawStatus) -> Option<Command> {
    if swing_mode(status) == Some(on) {
        return None;
    }
    let raw = if on { fields::swing::ON } else { fields::swing::OFF };
    Some(Command::new().with(Field::SwingMode, raw))
}
