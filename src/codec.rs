//! Decoding of raw register words into typed quantities.
//!
//! Nothing in here performs I/O or fails: malformed input decodes to `None` (or a default),
//! so that a single weird register never fails a whole status read.

use crate::registers::{Address, DecodeKind, LegacyRange, Register};
use crate::status::{Mode, ModeTable, Setpoint};

/// Device convention for "value not available".
pub const UNAVAILABLE: u16 = 0xFFFF;

/// The raw representation of a register value, as it came over the wire.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum RawValue {
    /// Legacy register dumps encode each word as four hex digits (e.g. `4a01`).
    Hex(String),
    /// The EKD API returns JSON integers, signed or unsigned depending on firmware.
    Integer(i64),
}

impl RawValue {
    /// Interpret an EKD JSON value.
    ///
    /// Strings are always read as decimal integers, the way some firmware quotes numbers.
    /// Anything else (hex digits included) is not a value.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Integer),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok().map(Self::Integer),
            _ => None,
        }
    }

    /// Interpret a value of the legacy register dump, where strings are always hex.
    pub fn from_legacy_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Integer),
            serde_json::Value::String(s) => Some(Self::Hex(s.clone())),
            _ => None,
        }
    }

    /// The 16-bit word behind this value, if the representation is well-formed.
    ///
    /// Negative integers are taken as the two's complement encoding of the word.
    pub fn word(&self) -> Option<u16> {
        match self {
            Self::Hex(text) => {
                let text = text.trim();
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(text);
                u16::from_str_radix(digits, 16).ok()
            }
            Self::Integer(n) => match *n {
                n @ 0..=0xFFFF => Some(n as u16),
                n @ -0x8000..0 => Some(n as i16 as u16),
                _ => None,
            },
        }
    }
}

/// A raw register value together with the address it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterValue {
    pub address: Address,
    pub raw: RawValue,
}

impl RegisterValue {
    pub fn new(address: Address, raw: RawValue) -> Self {
        Self { address, raw }
    }

    pub fn word(&self) -> Option<u16> {
        self.raw.word()
    }

    /// The integer the word encodes, with byte order and sign resolved for the address.
    fn number(&self) -> Option<i32> {
        let word = self.word()?;
        Some(match self.address {
            Address::Variable(_) => decode_signed16(word),
            Address::Legacy(_) => decode_signed16(word.swap_bytes()),
        })
    }
}

/// Reinterpret a 16-bit word as two's complement.
pub fn decode_signed16(raw: u16) -> i32 {
    let value = i32::from(raw);
    if value & 0x8000 != 0 { value - 65536 } else { value }
}

/// A flag is set when the low byte of the word is non-zero.
///
/// The high byte carries unrelated state: known "off" samples such as `0x0100` and `0x4600`
/// have it set.
pub fn decode_boolean(raw: i32) -> bool {
    raw & 0xFF != 0
}

fn tenths(value: i32) -> f64 {
    f64::from(value) / 10.0
}

/// Decode a temperature in °C with one decimal of resolution.
///
/// EKD variables carry signed tenths of a degree. Legacy registers store the word
/// little-endian, so the bytes are swapped before scaling.
pub fn decode_temperature(value: &RegisterValue) -> Option<f64> {
    let word = value.word()?;
    if word == UNAVAILABLE {
        return None;
    }
    value.number().map(tenths)
}

/// Decode a heating setpoint, keeping the raw word alongside the best-effort value.
///
/// Legacy setpoint registers have no confirmed encoding. They are decoded like measured
/// temperatures and marked unverified.
pub fn decode_setpoint(value: &RegisterValue) -> Option<Setpoint> {
    let celsius = decode_temperature(value)?;
    let raw = value.word()?;
    let verified = match value.address {
        Address::Variable(_) => true,
        Address::Legacy(address) => LegacyRange::of(address) != LegacyRange::Setpoint,
    };
    Some(Setpoint { celsius, raw, verified })
}

pub fn decode_mode(raw: i32, table: ModeTable) -> Mode {
    table.decode(raw)
}

/// Power is reported in watts.
pub fn decode_power(raw: u16) -> Option<i64> {
    (raw != UNAVAILABLE).then_some(i64::from(raw))
}

pub fn decode_error_code(raw: i32) -> i64 {
    i64::from(raw)
}

/// A single decoded field of a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    Temperature(f64),
    Setpoint(Setpoint),
    Flag(bool),
    Mode(Mode),
    Power(i64),
    ErrorCode(i64),
}

/// Decode a register as described by its catalog entry.
pub fn decode(register: &Register, raw: RawValue) -> Option<Decoded> {
    let value = RegisterValue::new(register.address, raw);
    let word = value.word()?;
    let number = value.number()?;
    Some(match register.kind {
        DecodeKind::Temperature => Decoded::Temperature(decode_temperature(&value)?),
        DecodeKind::Setpoint => Decoded::Setpoint(decode_setpoint(&value)?),
        DecodeKind::Flag => match register.address {
            Address::Variable(_) => Decoded::Flag(decode_boolean(number)),
            Address::Legacy(_) => Decoded::Flag(decode_boolean(i32::from(word))),
        },
        DecodeKind::Mode => {
            let table = match register.address {
                Address::Variable(_) => ModeTable::Ekd,
                Address::Legacy(_) => ModeTable::Legacy,
            };
            Decoded::Mode(decode_mode(number, table))
        }
        DecodeKind::Power => Decoded::Power(decode_power(word).map(|_| i64::from(number))?),
        DecodeKind::ErrorCode => Decoded::ErrorCode(decode_error_code(number)),
    })
}

/// Encode a temperature as the tenths-of-a-degree word the EKD API accepts.
pub fn encode_tenths(celsius: f64) -> u16 {
    (celsius * 10.0).round() as i16 as u16
}

/// Every interpretation of a word as a temperature that has been seen in the field.
///
/// Used to calibrate registers whose encoding is not known yet against values displayed by
/// the manufacturer's own frontend.
pub fn candidates(word: u16) -> Vec<(&'static str, f64)> {
    let [high, low] = word.to_be_bytes();
    let swapped = word.swap_bytes();
    let bcd = |b: u8| f64::from(b >> 4) * 10.0 + f64::from(b & 0xF);
    vec![
        ("swapped/10", f64::from(swapped) / 10.0),
        ("plain/10", f64::from(word) / 10.0),
        ("swapped/100", f64::from(swapped) / 100.0),
        ("plain/100", f64::from(word) / 100.0),
        ("signed/10", tenths(decode_signed16(word))),
        ("high.low", f64::from(high) + f64::from(low) / 100.0),
        ("low.high", f64::from(low) + f64::from(high) / 100.0),
        ("bcd", bcd(high) + bcd(low) / 100.0),
        ("high byte", f64::from(high)),
        ("low byte", f64::from(low)),
    ]
}
