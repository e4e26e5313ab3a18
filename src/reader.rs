//! Producing status snapshots, and the client consumers poll.

use crate::codec::{self, RawValue};
use crate::connection::{Api, Config};
use crate::devices::{self, DeviceAddress, DeviceDescriptor};
use crate::error::Error;
use crate::registers::{self, Address, Register};
use crate::session::{SessionManager, SessionState};
use crate::status::{DecodedStatus, Mode, ModeTable, Protocol};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

const CO_SETPOINT_RANGE: (f64, f64) = (15.0, 35.0);
const CWU_SETPOINT_RANGE: (f64, f64) = (20.0, 60.0);

/// Per-connection state. Only ever touched with the client's lock held.
struct ConnectionState {
    address: Option<DeviceAddress>,
    session: SessionManager,
}

impl ConnectionState {
    async fn address(&mut self, api: &Api) -> Result<DeviceAddress, Error> {
        if let Some(address) = self.address {
            return Ok(address);
        }
        let address = devices::resolve_address(api).await?;
        self.address = Some(address);
        Ok(address)
    }

    /// Prepare for a retry after a session-class failure.
    fn recover(&mut self, api: &Api, error: &Error) {
        warn!(
            message = "session-class failure, re-establishing the session",
            error = (error as &dyn std::error::Error)
        );
        if error.is_wrong_id() && api.config().pinned_address().is_none() {
            debug!(message = "forgetting the discovered device address");
            self.address = None;
        }
        self.session.invalidate("register access reported a session failure");
    }
}

/// A client for a single heater behind a C.MI controller.
///
/// All operations on one client are serialized: concurrent callers wait for the in-flight
/// poll (and any session handshake it does) to complete.
pub struct KospelClient {
    api: Api,
    state: Mutex<ConnectionState>,
}

impl KospelClient {
    pub fn new(config: Config) -> Result<Self, Error> {
        let state = ConnectionState {
            address: config.pinned_address(),
            session: SessionManager::new(),
        };
        Ok(Self { api: Api::new(config)?, state: Mutex::new(state) })
    }

    pub fn config(&self) -> &Config {
        self.api.config()
    }

    pub async fn session_state(&self) -> SessionState {
        self.state.lock().await.session.state()
    }

    /// Forget the session and any discovered device address.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.address = self.api.config().pinned_address();
        state.session.invalidate("requested by the caller");
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, Error> {
        devices::list_devices(&self.api).await
    }

    /// Check that the controller is reachable and has a heater to talk to.
    pub async fn test_connection(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.address(&self.api).await {
            Ok(address) => {
                debug!(message = "connection test passed", id = address.id);
                true
            }
            Err(e) => {
                warn!(message = "connection test failed", error = (&e as &dyn std::error::Error));
                false
            }
        }
    }

    /// Read one complete status snapshot.
    ///
    /// A failure the controller attributes to the session is retried once, after the session
    /// has been re-established. Other failures are returned as they are.
    pub async fn get_status(&self) -> Result<DecodedStatus, Error> {
        let mut state = self.state.lock().await;
        match self.poll(&mut state).await {
            Err(e) if e.is_session_error() => {
                state.recover(&self.api, &e);
                self.poll(&mut state).await
            }
            result => result,
        }
    }

    async fn poll(&self, state: &mut ConnectionState) -> Result<DecodedStatus, Error> {
        let address = state.address(&self.api).await?;
        match self.api.config().protocol {
            Protocol::Ekd => {
                let session = state.session.ensure(&self.api, address).await?;
                let names = registers::ekd_variable_names();
                let regs = self.api.ekd_read(&session.id, &names).await?;
                trace!(message = "read variables", count = regs.len());
                Ok(decode_ekd(&regs, session.degraded))
            }
            Protocol::Legacy => {
                let regs = self.api.legacy_registers(address.id).await?;
                trace!(message = "read registers", count = regs.len());
                Ok(decode_legacy(&regs))
            }
        }
    }

    /// Set the central heating setpoint. The value is clamped to 15-35 °C.
    pub async fn set_temperature(&self, celsius: f64) -> Result<(), Error> {
        let word = setpoint_word(celsius, CO_SETPOINT_RANGE)?;
        self.write(registers::CO_SETPOINT_VARIABLE, word).await
    }

    /// Set the hot water setpoint. The value is clamped to 20-60 °C.
    pub async fn set_water_temperature(&self, celsius: f64) -> Result<(), Error> {
        let word = setpoint_word(celsius, CWU_SETPOINT_RANGE)?;
        self.write(registers::CWU_SETPOINT_VARIABLE, word).await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), Error> {
        let word = ModeTable::Ekd.encode(mode).ok_or(Error::UnwritableMode(mode))?;
        self.write(registers::MODE_VARIABLE, word).await
    }

    async fn write(&self, name: &'static str, word: u16) -> Result<(), Error> {
        let mut values = Map::new();
        values.insert(name.to_string(), Value::from(codec::decode_signed16(word)));
        let mut state = self.state.lock().await;
        match self.write_values(&mut state, &values).await {
            Err(e) if e.is_session_error() => {
                state.recover(&self.api, &e);
                self.write_values(&mut state, &values).await
            }
            result => result,
        }?;
        debug!(message = "wrote variable", name, word);
        Ok(())
    }

    async fn write_values(
        &self,
        state: &mut ConnectionState,
        values: &Map<String, Value>,
    ) -> Result<(), Error> {
        let address = state.address(&self.api).await?;
        let session = state.session.ensure(&self.api, address).await?;
        self.api.ekd_write(&session.id, values.clone()).await
    }
}

/// Clamp a setpoint into `(min, max)` and encode it. NaN and infinities are rejected.
fn setpoint_word(celsius: f64, (min, max): (f64, f64)) -> Result<u16, Error> {
    if !celsius.is_finite() {
        return Err(Error::InvalidTemperature(celsius));
    }
    Ok(codec::encode_tenths(celsius.clamp(min, max)))
}

fn decode_registers(
    mut status: DecodedStatus,
    catalog: &[Register],
    lookup: impl Fn(&Register) -> Option<RawValue>,
) -> DecodedStatus {
    for register in catalog {
        let Some(raw) = lookup(register) else {
            trace!(message = "register not in response", address = %register.address);
            continue;
        };
        match codec::decode(register, raw) {
            Some(value) => status.set(register.field, value),
            None => trace!(message = "register value unavailable", address = %register.address),
        }
    }
    status
}

/// Decode the `regs` of an EKD batch read.
pub fn decode_ekd(regs: &Map<String, Value>, degraded_session: bool) -> DecodedStatus {
    let status = DecodedStatus::empty(Protocol::Ekd, degraded_session);
    decode_registers(status, &registers::EKD_VARIABLES, |register| match register.address {
        Address::Variable(name) => RawValue::from_json(regs.get(name)?),
        Address::Legacy(_) => None,
    })
}

/// Decode the `regs` of a legacy register dump, keyed by hex address.
pub fn decode_legacy(regs: &Map<String, Value>) -> DecodedStatus {
    let by_address = regs
        .iter()
        .filter_map(|(key, value)| Some((u16::from_str_radix(key.trim(), 16).ok()?, value)))
        .collect::<HashMap<_, _>>();
    let status = DecodedStatus::empty(Protocol::Legacy, false);
    decode_registers(status, &registers::LEGACY_REGISTERS, |register| match register.address {
        Address::Legacy(address) => RawValue::from_legacy_json(by_address.get(&address)?),
        Address::Variable(_) => None,
    })
}
