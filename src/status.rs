use crate::codec::Decoded;
use crate::registers::Field;

/// Operating mode of a heater.
///
/// The legacy registers and the EKD `OPERATING_MODE` variable use different numbering, see
/// [`ModeTable`]. Values neither table knows about are kept as [`Mode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    Off,
    Heat,
    Auto,
    Eco,
    Manual,
    Heating,
    Summer,
    Winter,
    #[strum(disabled)]
    Unknown(i32),
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Unknown(n) => write!(f, "mode_{n}"),
            known => {
                let name: &'static str = known.into();
                f.write_str(name)
            }
        }
    }
}

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTable {
    Legacy,
    Ekd,
}

impl ModeTable {
    const LEGACY: [Mode; 4] = [Mode::Off, Mode::Heat, Mode::Auto, Mode::Eco];
    const EKD: [Mode; 6] =
        [Mode::Auto, Mode::Manual, Mode::Off, Mode::Heating, Mode::Summer, Mode::Winter];

    fn modes(self) -> &'static [Mode] {
        match self {
            ModeTable::Legacy => &Self::LEGACY,
            ModeTable::Ekd => &Self::EKD,
        }
    }

    pub fn decode(self, raw: i32) -> Mode {
        usize::try_from(raw)
            .ok()
            .and_then(|index| self.modes().get(index).copied())
            .unwrap_or(Mode::Unknown(raw))
    }

    /// The register value for `mode`, if the table has one. [`Mode::Unknown`] never has one.
    pub fn encode(self, mode: Mode) -> Option<u16> {
        let index = self.modes().iter().position(|m| *m == mode)?;
        u16::try_from(index).ok()
    }
}

/// A heating setpoint.
///
/// Not every register encoding of setpoints is understood; `verified` is `false` when the
/// value in `celsius` is a best guess and `raw` should be consulted.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Setpoint {
    pub celsius: f64,
    pub raw: u16,
    pub verified: bool,
}

/// Which register protocol a status was read over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Protocol {
    /// Named variables over `/api/ekd/read`.
    #[default]
    Ekd,
    /// The per-device register dump at `/api/dev/<id>`.
    Legacy,
}

/// One complete poll of a heater.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DecodedStatus {
    pub retrieved_at: jiff::Timestamp,
    pub protocol: Protocol,
    /// The session could not be established properly and the device id was used in place of
    /// a session id.
    pub degraded_session: bool,
    pub current_temperature: Option<f64>,
    pub target_temperature_co: Option<Setpoint>,
    pub target_temperature_cwu: Option<Setpoint>,
    pub water_temperature: Option<f64>,
    pub outside_temperature: Option<f64>,
    pub return_temperature: Option<f64>,
    pub heater_running: Option<bool>,
    pub water_heating: Option<bool>,
    pub pump_running: Option<bool>,
    pub mode: Option<Mode>,
    pub power: Option<i64>,
    pub error_code: Option<i64>,
}

impl DecodedStatus {
    pub(crate) fn empty(protocol: Protocol, degraded_session: bool) -> Self {
        Self {
            retrieved_at: jiff::Timestamp::now(),
            protocol,
            degraded_session,
            current_temperature: None,
            target_temperature_co: None,
            target_temperature_cwu: None,
            water_temperature: None,
            outside_temperature: None,
            return_temperature: None,
            heater_running: None,
            water_heating: None,
            pump_running: None,
            mode: None,
            power: None,
            error_code: None,
        }
    }

    /// Store a decoded value into its field. Values of the wrong shape for the field are
    /// dropped.
    pub(crate) fn set(&mut self, field: Field, value: Decoded) {
        use Decoded as D;
        match (field, value) {
            (Field::CurrentTemperature, D::Temperature(t)) => self.current_temperature = Some(t),
            (Field::WaterTemperature, D::Temperature(t)) => self.water_temperature = Some(t),
            (Field::OutsideTemperature, D::Temperature(t)) => self.outside_temperature = Some(t),
            (Field::ReturnTemperature, D::Temperature(t)) => self.return_temperature = Some(t),
            (Field::TargetTemperatureCo, D::Setpoint(s)) => self.target_temperature_co = Some(s),
            (Field::TargetTemperatureCwu, D::Setpoint(s)) => self.target_temperature_cwu = Some(s),
            (Field::HeaterRunning, D::Flag(b)) => self.heater_running = Some(b),
            (Field::WaterHeating, D::Flag(b)) => self.water_heating = Some(b),
            (Field::PumpRunning, D::Flag(b)) => self.pump_running = Some(b),
            (Field::Mode, D::Mode(m)) => self.mode = Some(m),
            (Field::Power, D::Power(w)) => self.power = Some(w),
            (Field::ErrorCode, D::ErrorCode(c)) => self.error_code = Some(c),
            (field, value) => {
                tracing::warn!(message = "decoded value does not fit its field", %field, ?value)
            }
        }
    }

    /// The fields as display strings, in catalog order. Absent values are empty.
    pub fn display_values(&self) -> Vec<(Field, String)> {
        fn show<T: std::fmt::Display>(v: Option<T>) -> String {
            v.map(|v| v.to_string()).unwrap_or_default()
        }
        fn setpoint(s: Option<Setpoint>) -> String {
            match s {
                None => String::new(),
                Some(s) if s.verified => s.celsius.to_string(),
                Some(s) => format!("{} (raw {:04x}, unverified)", s.celsius, s.raw),
            }
        }
        vec![
            (Field::CurrentTemperature, show(self.current_temperature)),
            (Field::TargetTemperatureCo, setpoint(self.target_temperature_co)),
            (Field::TargetTemperatureCwu, setpoint(self.target_temperature_cwu)),
            (Field::WaterTemperature, show(self.water_temperature)),
            (Field::OutsideTemperature, show(self.outside_temperature)),
            (Field::ReturnTemperature, show(self.return_temperature)),
            (Field::HeaterRunning, show(self.heater_running)),
            (Field::WaterHeating, show(self.water_heating)),
            (Field::PumpRunning, show(self.pump_running)),
            (Field::Mode, show(self.mode)),
            (Field::Power, show(self.power)),
            (Field::ErrorCode, show(self.error_code)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names() {
        assert_eq!(Mode::Eco.to_string(), "eco");
        assert_eq!("summer".parse::<Mode>().unwrap(), Mode::Summer);
        assert!("mode_7".parse::<Mode>().is_err());
        assert_eq!(serde_json::to_string(&Mode::Unknown(7)).unwrap(), "\"mode_7\"");
    }

    #[test]
    fn mode_tables_round_trip() {
        for table in [ModeTable::Legacy, ModeTable::Ekd] {
            for raw in 0..table.modes().len() {
                let mode = table.decode(raw as i32);
                assert_ne!(mode, Mode::Unknown(raw as i32));
                assert_eq!(table.encode(mode), Some(raw as u16));
            }
            let unknown = table.decode(42);
            assert_eq!(unknown, Mode::Unknown(42));
            assert_eq!(table.encode(unknown), None);
        }
        assert_eq!(ModeTable::Legacy.encode(Mode::Summer), None);
        assert_eq!(ModeTable::Ekd.decode(-1), Mode::Unknown(-1));
    }

    #[test]
    fn mismatched_values_are_dropped() {
        let mut status = DecodedStatus::empty(Protocol::Ekd, false);
        status.set(Field::Mode, Decoded::Flag(true));
        assert_eq!(status.mode, None);
        status.set(Field::HeaterRunning, Decoded::Flag(true));
        assert_eq!(status.heater_running, Some(true));
    }
}
