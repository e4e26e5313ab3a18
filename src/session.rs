//! Establishing and keeping the EKD session alive.
//!
//! The EKD read endpoint needs a session device id which the controller hands out after a
//! handshake. Firmware versions disagree on which handshake they accept, so the steps of
//! [`LADDER`] are tried in order until the controller reports a bound session. If none
//! succeeds the device id itself is used as the session id ("degraded" session), which
//! some firmware accepts and which at least lets the read report a proper error otherwise.

use crate::connection::{Api, SessionBody};
use crate::devices::DeviceAddress;
use crate::error::Error;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sessions are refreshed proactively once they get this old.
pub const SESSION_TTL: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Establishing,
    Established,
    /// No handshake worked and the device id stands in for the session id.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub established_at: Instant,
    pub degraded: bool,
}

impl SessionHandle {
    pub fn is_stale_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.established_at) > SESSION_TTL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Handshake {
    /// Bind device id and type through `/api/selectModule`.
    SelectModule,
    /// Bind the device id, sent as a number, through `/api/sessionDevice`.
    BindNumeric,
    /// Bind the device id, sent as text, through `/api/sessionDevice`.
    BindText,
    /// Hit the web interface root.
    Warm,
}

pub const LADDER: [Handshake; 4] =
    [Handshake::SelectModule, Handshake::BindNumeric, Handshake::BindText, Handshake::Warm];

impl Handshake {
    async fn attempt(self, api: &Api, address: DeviceAddress) -> Result<(), Error> {
        match self {
            Handshake::SelectModule => api.select_module(address).await,
            Handshake::BindNumeric => {
                api.bind_session_device(SessionBody::Numeric(address.id)).await
            }
            Handshake::BindText => api.bind_session_device(SessionBody::Text(address.id)).await,
            Handshake::Warm => api.warm_session().await,
        }
    }
}

/// Checks whether the controller currently has a session bound. Any failure counts as "no".
pub async fn check_session(api: &Api) -> Option<String> {
    match api.session_device().await {
        Ok(id) => id,
        Err(e) => {
            debug!(message = "session check failed", error = (&e as &dyn std::error::Error));
            None
        }
    }
}

pub struct SessionManager {
    state: SessionState,
    handle: Option<SessionHandle>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self { state: SessionState::Uninitialized, handle: None }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    /// Forget the current session. The next [`Self::ensure`] runs the handshake again.
    pub fn invalidate(&mut self, reason: &str) {
        if let Some(handle) = self.handle.take() {
            debug!(message = "invalidating session", session = %handle.id, reason);
        }
        if self.state != SessionState::Uninitialized {
            self.state = SessionState::Establishing;
        }
    }

    /// Return a usable session, (re-)establishing it as necessary.
    pub async fn ensure(
        &mut self,
        api: &Api,
        address: DeviceAddress,
    ) -> Result<SessionHandle, Error> {
        if let Some(handle) = self.handle.as_mut() {
            if handle.is_stale_at(Instant::now()) {
                self.invalidate("session is older than its time to live");
            } else if handle.degraded {
                return Ok(handle.clone());
            } else {
                match check_session(api).await {
                    Some(id) => {
                        if handle.id != id {
                            debug!(
                                message = "controller rebound the session",
                                old = %handle.id,
                                new = %id
                            );
                            handle.id = id;
                        }
                        return Ok(handle.clone());
                    }
                    None => self.invalidate("controller reports no session"),
                }
            }
        }
        self.establish(api, address).await
    }

    /// Run the handshake ladder from scratch.
    ///
    /// Nothing is stored until the ladder completes, so dropping this future halfway leaves
    /// the manager without a session rather than with a half-established one.
    pub async fn establish(
        &mut self,
        api: &Api,
        address: DeviceAddress,
    ) -> Result<SessionHandle, Error> {
        self.handle = None;
        self.state = SessionState::Establishing;
        let mut only_transport_failures = true;
        let mut last_error = None;
        for step in LADDER {
            match step.attempt(api, address).await {
                Ok(()) => only_transport_failures = false,
                Err(e) => {
                    debug!(
                        message = "handshake step failed",
                        %step,
                        error = (&e as &dyn std::error::Error)
                    );
                    only_transport_failures &= is_transport_failure(&e);
                    last_error = Some(e);
                    continue;
                }
            }
            if let Some(id) = check_session(api).await {
                info!(message = "session established", %step, session = %id);
                return Ok(self.commit(SessionHandle {
                    id,
                    established_at: Instant::now(),
                    degraded: false,
                }));
            }
            debug!(message = "handshake step did not bind a session", %step);
        }
        if let (true, Some(e)) = (only_transport_failures, last_error) {
            return Err(e);
        }
        warn!(
            message = "no handshake established a session, using the device id instead",
            device_id = address.id
        );
        Ok(self.commit(SessionHandle {
            id: address.id.to_string(),
            established_at: Instant::now(),
            degraded: true,
        }))
    }

    fn commit(&mut self, handle: SessionHandle) -> SessionHandle {
        self.state = if handle.degraded { SessionState::Degraded } else { SessionState::Established };
        self.handle = Some(handle.clone());
        handle
    }
}

/// The controller could not be talked to at all, as opposed to rejecting the handshake.
fn is_transport_failure(e: &Error) -> bool {
    matches!(e, Error::Request(..) | Error::Timeout(..))
}
