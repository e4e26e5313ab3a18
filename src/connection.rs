//! The controller's HTTP endpoints.

use crate::devices::DeviceAddress;
use crate::error::Error;
use crate::status::Protocol;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, trace};

const EKD_MEDIA_TYPE: &str = "application/vnd.kospel.cmi-v1+json";

/// Bodies longer than this are cut when kept in errors.
const ERROR_BODY_LIMIT: usize = 256;

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Config")]
pub struct Config {
    /// Base URL of the C.MI controller, e.g. `http://192.168.1.10/`.
    #[arg(long, short = 'u')]
    pub url: reqwest::Url,

    /// The heater's device id. Discovered from the device listing when not specified.
    #[arg(long, short = 'i')]
    pub device_id: Option<u32>,

    /// The heater's device type code. Looked up in the device listing when not specified.
    #[arg(long, requires = "device_id")]
    pub device_type: Option<u32>,

    /// Which register interface to read the status over.
    #[arg(long, value_enum, default_value_t = Protocol::Ekd)]
    pub protocol: Protocol,

    /// Consider any request failed if it does not complete in this amount of time.
    #[arg(long, default_value = "10s")]
    pub request_timeout: humantime::Duration,

    /// Timeout for the individual session handshake steps and session validity checks.
    ///
    /// A handshake step that times out is treated as failed and the next step is tried.
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: humantime::Duration,

    /// Log the body of every controller response at the debug level.
    #[arg(long)]
    pub protocol_dumps: bool,
}

impl Config {
    pub fn new(url: reqwest::Url) -> Self {
        Self {
            url,
            device_id: None,
            device_type: None,
            protocol: Protocol::Ekd,
            request_timeout: Duration::from_secs(10).into(),
            handshake_timeout: Duration::from_secs(5).into(),
            protocol_dumps: false,
        }
    }

    /// The address given in the configuration, if it is complete.
    pub fn pinned_address(&self) -> Option<DeviceAddress> {
        Some(DeviceAddress { id: self.device_id?, device_type: self.device_type? })
    }
}

/// How the id is sent when binding a session to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBody {
    /// As a JSON number.
    Numeric(u32),
    /// As a `text/plain` string.
    Text(u32),
}

pub struct Api {
    http: reqwest::Client,
    config: Config,
}

impl Api {
    pub fn new(config: Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(*config.request_timeout)
            .build()
            .map_err(Error::CreateReqwest)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn url(&self, path: &str) -> Result<reqwest::Url, Error> {
        self.config.url.join(path).map_err(|e| Error::Url(e.to_string(), path.to_string()))
    }

    fn handshake_timeout(&self) -> Duration {
        *self.config.handshake_timeout
    }

    /// Send the request and return the response body, failing on non-2xx statuses.
    async fn send(&self, endpoint: &str, request: reqwest::RequestBuilder) -> Result<String, Error> {
        trace!(message = "sending request", endpoint);
        let response = request.send().await.map_err(|e| Error::from_reqwest(e, endpoint))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| Error::from_reqwest(e, endpoint))?;
        if self.config.protocol_dumps {
            debug!(message = "response", endpoint, status = status.as_u16(), body = %body);
        }
        if !status.is_success() {
            let mut body = body;
            if body.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(Error::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_json(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, Error> {
        let body = self.send(endpoint, request).await?;
        serde_json::from_str(&body).map_err(|e| Error::JsonDecode(e, endpoint.to_string()))
    }

    /// `GET /api/dev`: the raw `devs` listing.
    pub async fn device_listing(&self) -> Result<Value, Error> {
        const ENDPOINT: &str = "api/dev";
        let request = self.http.get(self.url(ENDPOINT)?);
        let mut body = self.send_json(ENDPOINT, request).await?;
        body.get_mut("devs").map(Value::take).ok_or(Error::MissingKey(ENDPOINT.into(), "devs"))
    }

    /// `GET /api/sessionDevice`: the session id currently bound, `None` if there is none.
    pub async fn session_device(&self) -> Result<Option<String>, Error> {
        const ENDPOINT: &str = "api/sessionDevice";
        let request = self.http.get(self.url(ENDPOINT)?).timeout(self.handshake_timeout());
        let body = self.send_json(ENDPOINT, request).await?;
        let id = body
            .get("sessionDevice")
            .ok_or(Error::MissingKey(ENDPOINT.into(), "sessionDevice"))?;
        let id = match id {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => return Err(Error::MissingKey(ENDPOINT.into(), "sessionDevice")),
        };
        Ok((!id.is_empty() && id != "-1").then_some(id))
    }

    /// `POST /api/selectModule`: bind the device to the controller session.
    pub async fn select_module(&self, address: DeviceAddress) -> Result<(), Error> {
        const ENDPOINT: &str = "api/selectModule";
        let form = [("id", address.id.to_string()), ("devType", address.device_type.to_string())];
        let request =
            self.http.post(self.url(ENDPOINT)?).form(&form).timeout(self.handshake_timeout());
        let body = self.send_json(ENDPOINT, request).await?;
        match status_code(&body) {
            Some(0) => Ok(()),
            status => Err(Error::DeviceStatus {
                endpoint: ENDPOINT.into(),
                status: status.unwrap_or(-1),
                message: status_message(&body),
            }),
        }
    }

    /// `POST /api/sessionDevice`: bind the session to a device id.
    pub async fn bind_session_device(&self, body: SessionBody) -> Result<(), Error> {
        const ENDPOINT: &str = "api/sessionDevice";
        let request = self.http.post(self.url(ENDPOINT)?).timeout(self.handshake_timeout());
        let request = match body {
            SessionBody::Numeric(id) => request.json(&id),
            SessionBody::Text(id) => request.header(CONTENT_TYPE, "text/plain").body(id.to_string()),
        };
        self.send(ENDPOINT, request).await?;
        Ok(())
    }

    /// `GET /`: some firmware establishes a session on any hit of the web interface.
    pub async fn warm_session(&self) -> Result<(), Error> {
        const ENDPOINT: &str = "/";
        let request = self.http.get(self.url(ENDPOINT)?).timeout(self.handshake_timeout());
        self.send(ENDPOINT, request).await?;
        Ok(())
    }

    /// `POST /api/ekd/read/<session>`: read a batch of named variables.
    pub async fn ekd_read(&self, session: &str, names: &[&str]) -> Result<Map<String, Value>, Error> {
        const ENDPOINT: &str = "api/ekd/read";
        let request = self
            .http
            .post(self.url(&format!("{ENDPOINT}/{session}"))?)
            .header(ACCEPT, EKD_MEDIA_TYPE)
            .json(names);
        let body = self.send_json(ENDPOINT, request).await?;
        check_device_status(ENDPOINT, &body)?;
        registers(ENDPOINT, body)
    }

    /// `POST /api/ekd/write/<session>`: write named variables.
    pub async fn ekd_write(&self, session: &str, values: Map<String, Value>) -> Result<(), Error> {
        const ENDPOINT: &str = "api/ekd/write";
        let request = self
            .http
            .post(self.url(&format!("{ENDPOINT}/{session}"))?)
            .header(ACCEPT, EKD_MEDIA_TYPE)
            .json(&values);
        let body = self.send_json(ENDPOINT, request).await?;
        check_device_status(ENDPOINT, &body)
    }

    /// `GET /api/dev/<id>`: the legacy dump of all registers of a device, keyed by hex address.
    pub async fn legacy_registers(&self, device_id: u32) -> Result<Map<String, Value>, Error> {
        const ENDPOINT: &str = "api/dev/<id>";
        let request = self.http.get(self.url(&format!("api/dev/{device_id}"))?);
        let body = self.send_json(ENDPOINT, request).await?;
        check_device_status(ENDPOINT, &body)?;
        registers(ENDPOINT, body)
    }
}

/// The `status` of a response body. Firmware sends it as a number or as a numeric string.
fn status_code(body: &Value) -> Option<i64> {
    match body.get("status")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn status_message(body: &Value) -> String {
    match body.get("status_msg") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn check_device_status(endpoint: &str, body: &Value) -> Result<(), Error> {
    match status_code(body) {
        Some(status) if status < 0 => Err(Error::DeviceStatus {
            endpoint: endpoint.to_string(),
            status,
            message: status_message(body),
        }),
        _ => Ok(()),
    }
}

fn registers(endpoint: &str, mut body: Value) -> Result<Map<String, Value>, Error> {
    match body.get_mut("regs").map(Value::take) {
        Some(Value::Object(regs)) => Ok(regs),
        _ => Err(Error::MissingKey(endpoint.to_string(), "regs")),
    }
}
