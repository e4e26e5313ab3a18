//! The catalog of registers a status read consists of.

use crate::status::Protocol;

/// Where a register value is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// A numeric register in the legacy per-device dump.
    Legacy(u16),
    /// A named variable of the EKD API.
    Variable(&'static str),
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Legacy(address) => write!(f, "0x{address:04x}"),
            Address::Variable(name) => f.write_str(name),
        }
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Legacy register address ranges. Decoding of some quantities depends on the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LegacyRange {
    Flags,
    Setpoint,
    Measured,
    Other,
}

impl LegacyRange {
    pub fn of(address: u16) -> Self {
        match address {
            0x0b30..=0x0b3f => Self::Flags,
            0x0bb8..=0x0bbf => Self::Setpoint,
            0x0c1c..=0x0c1f => Self::Measured,
            _ => Self::Other,
        }
    }
}

/// A field of [`crate::status::DecodedStatus`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    CurrentTemperature,
    TargetTemperatureCo,
    TargetTemperatureCwu,
    WaterTemperature,
    OutsideTemperature,
    ReturnTemperature,
    HeaterRunning,
    WaterHeating,
    PumpRunning,
    Mode,
    Power,
    ErrorCode,
}

/// How the word of a register is turned into a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecodeKind {
    Temperature,
    Setpoint,
    Flag,
    Mode,
    Power,
    ErrorCode,
}

#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct Register {
    pub address: Address,
    pub field: Field,
    pub kind: DecodeKind,
    pub description: &'static str,
}

macro_rules! registers {
    ($($address: expr => $field: ident, $kind: ident, $description: literal;)*) => {
        [$(Register {
            address: $address,
            field: Field::$field,
            kind: DecodeKind::$kind,
            description: $description,
        }),*]
    }
}

use Address::{Legacy as L, Variable as V};

/// EKD variables that accept writes.
pub const CO_SETPOINT_VARIABLE: &str = "TEMP_CO_SETPOINT";
pub const CWU_SETPOINT_VARIABLE: &str = "TEMP_CWU_SETPOINT";
pub const MODE_VARIABLE: &str = "OPERATING_MODE";

/// Variables requested from the EKD API in every status read, in request order.
pub const EKD_VARIABLES: [Register; 12] = registers! {
    V("TEMP_ROOM") => CurrentTemperature, Temperature, "Room temperature";
    V(CO_SETPOINT_VARIABLE) => TargetTemperatureCo, Setpoint, "Central heating setpoint";
    V(CWU_SETPOINT_VARIABLE) => TargetTemperatureCwu, Setpoint, "Hot water setpoint";
    V("TEMP_CWU") => WaterTemperature, Temperature, "Hot water temperature";
    V("TEMP_EXT") => OutsideTemperature, Temperature, "Outside temperature";
    V("TEMP_RETURN") => ReturnTemperature, Temperature, "Return line temperature";
    V("FLAG_CH_HEATING") => HeaterRunning, Flag, "Central heating is active";
    V("FLAG_CWU_HEATING") => WaterHeating, Flag, "Hot water heating is active";
    V("FLAG_PUMP_CO") => PumpRunning, Flag, "Central heating pump is running";
    V(MODE_VARIABLE) => Mode, Mode, "0=auto, 1=manual, 2=off, 3=heating, 4=summer, 5=winter";
    V("POWER_CURRENT") => Power, Power, "Current heating power in W";
    V("ERROR_CODE") => ErrorCode, ErrorCode, "Active error code, 0 when none";
};

/// Registers of the legacy per-device dump. Words are stored little-endian.
pub const LEGACY_REGISTERS: [Register; 12] = registers! {
    L(0x0b30) => HeaterRunning, Flag, "Heater is running";
    L(0x0b31) => PumpRunning, Flag, "Pump is running";
    L(0x0b32) => WaterHeating, Flag, "Hot water heating is active";
    L(0x0b33) => Mode, Mode, "0=off, 1=heat, 2=auto, 3=eco";
    L(0x0bb8) => TargetTemperatureCo, Setpoint, "Central heating setpoint (encoding unverified)";
    L(0x0bb9) => TargetTemperatureCwu, Setpoint, "Hot water setpoint (encoding unverified)";
    L(0x0c1c) => CurrentTemperature, Temperature, "Room temperature";
    L(0x0c1d) => WaterTemperature, Temperature, "Hot water temperature";
    L(0x0c1e) => OutsideTemperature, Temperature, "Outside temperature";
    L(0x0c1f) => ReturnTemperature, Temperature, "Return line temperature";
    L(0x0c20) => Power, Power, "Current heating power in W";
    L(0x0c21) => ErrorCode, ErrorCode, "Active error code, 0 when none";
};

pub fn catalog(protocol: Protocol) -> &'static [Register] {
    match protocol {
        Protocol::Ekd => &EKD_VARIABLES,
        Protocol::Legacy => &LEGACY_REGISTERS,
    }
}

pub fn ekd_variable(field: Field) -> Option<&'static Register> {
    EKD_VARIABLES.iter().find(|r| r.field == field)
}

pub fn legacy_register(field: Field) -> Option<&'static Register> {
    LEGACY_REGISTERS.iter().find(|r| r.field == field)
}

/// The names sent in an EKD batch read.
pub fn ekd_variable_names() -> Vec<&'static str> {
    EKD_VARIABLES
        .iter()
        .filter_map(|r| match r.address {
            Address::Variable(name) => Some(name),
            Address::Legacy(_) => None,
        })
        .collect()
}

impl Register {
    pub fn is_match(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        self.address.to_string().to_lowercase().contains(&pattern)
            || self.field.to_string().contains(&pattern)
            || self.description.to_lowercase().contains(&pattern)
    }
}
