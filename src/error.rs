/// Substrings that mark a failure as caused by a missing or expired controller session.
///
/// The controller does not report session problems in a structured way, so reads are
/// classified by the text the controller (or its web server) returned.
pub const SESSION_ERROR_TOKENS: [&str; 8] =
    ["WRONG_ID", "SESSION", "UNAUTHORIZED", "FORBIDDEN", "500", "502", "503", "504"];

/// HTTP statuses that the controller returns when the session is gone.
const SESSION_ERROR_STATUSES: [u16; 6] = [401, 403, 500, 502, 503, 504];

/// Returns `true` if `message` names one of the [`SESSION_ERROR_TOKENS`].
pub fn is_session_error_message(message: &str) -> bool {
    let message = message.to_uppercase();
    SESSION_ERROR_TOKENS.iter().any(|token| message.contains(token))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure, timeout, unexpected HTTP status or malformed JSON.
    Connection,
    /// A well-formed response that is missing data or reports a device-side failure.
    Protocol,
    /// A connection or protocol error caused by the session. Recoverable by re-establishing.
    Session,
    /// No usable device could be found.
    Discovery,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not construct the HTTP client")]
    CreateReqwest(#[source] reqwest::Error),
    #[error("could not build the URL for `{1}` ({0})")]
    Url(String, String),
    #[error("request to `{1}` failed")]
    Request(#[source] reqwest::Error, String),
    #[error("request to `{1}` timed out")]
    Timeout(#[source] reqwest::Error, String),
    #[error("`{endpoint}` responded with HTTP status {status}")]
    HttpStatus { endpoint: String, status: u16, body: String },
    #[error("`{1}` returned a malformed JSON response")]
    JsonDecode(#[source] serde_json::Error, String),
    #[error("`{0}` response does not contain `{1}`")]
    MissingKey(String, &'static str),
    #[error("`{endpoint}` reported status {status}: {message}")]
    DeviceStatus { endpoint: String, status: i64, message: String },
    #[error("the device listing has an unrecognized shape")]
    UnrecognizedListing(#[source] serde_json::Error),
    #[error("the controller lists no heater devices")]
    NoDevice,
    #[error("device {0} is not present in the device listing")]
    DeviceNotListed(u32),
    #[error("could not discover the heater")]
    Discovery(#[source] Box<Error>),
    #[error("mode `{0}` cannot be written to the device")]
    UnwritableMode(crate::status::Mode),
    #[error("{0} is not a valid temperature")]
    InvalidTemperature(f64),
}

impl Error {
    pub(crate) fn from_reqwest(e: reqwest::Error, endpoint: &str) -> Self {
        if e.is_timeout() {
            Self::Timeout(e, endpoint.to_string())
        } else {
            Self::Request(e, endpoint.to_string())
        }
    }

    /// The text the controller reported for this failure, if any.
    fn device_message(&self) -> Option<String> {
        match self {
            Self::HttpStatus { status, body, .. } => Some(format!("HTTP {status} {body}")),
            Self::DeviceStatus { status, message, .. } => Some(format!("{status} {message}")),
            _ => None,
        }
    }

    pub fn is_session_error(&self) -> bool {
        if let Self::HttpStatus { status, .. } = self {
            if SESSION_ERROR_STATUSES.contains(status) {
                return true;
            }
        }
        self.device_message().is_some_and(|m| is_session_error_message(&m))
    }

    /// The controller did not recognize the device id it was given.
    pub fn is_wrong_id(&self) -> bool {
        self.device_message().is_some_and(|m| m.to_uppercase().contains("WRONG_ID"))
    }

    pub fn kind(&self) -> ErrorKind {
        let kind = match self {
            Self::CreateReqwest(_)
            | Self::Url(..)
            | Self::Request(..)
            | Self::Timeout(..)
            | Self::HttpStatus { .. }
            | Self::JsonDecode(..) => ErrorKind::Connection,
            Self::MissingKey(..)
            | Self::DeviceStatus { .. }
            | Self::UnwritableMode(_)
            | Self::InvalidTemperature(_) => ErrorKind::Protocol,
            Self::UnrecognizedListing(_)
            | Self::NoDevice
            | Self::DeviceNotListed(_)
            | Self::Discovery(_) => return ErrorKind::Discovery,
        };
        if self.is_session_error() { ErrorKind::Session } else { kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_status(message: &str) -> Error {
        Error::DeviceStatus {
            endpoint: "/api/ekd/read".into(),
            status: -1,
            message: message.into(),
        }
    }

    #[test]
    fn token_table() {
        assert!(is_session_error_message("WRONG_ID"));
        assert!(is_session_error_message("invalid session"));
        assert!(is_session_error_message("HTTP 503 Service Unavailable"));
        assert!(!is_session_error_message("TIMEOUT"));
        assert!(!is_session_error_message(""));
    }

    #[test]
    fn kinds() {
        assert_eq!(device_status("WRONG_ID").kind(), ErrorKind::Session);
        assert_eq!(device_status("BUSY").kind(), ErrorKind::Protocol);
        assert_eq!(Error::MissingKey("/api/ekd/read".into(), "regs").kind(), ErrorKind::Protocol);
        assert_eq!(Error::NoDevice.kind(), ErrorKind::Discovery);
        assert_eq!(Error::InvalidTemperature(f64::NAN).kind(), ErrorKind::Protocol);
        let unavailable = Error::HttpStatus {
            endpoint: "/api/ekd/read".into(),
            status: 502,
            body: String::new(),
        };
        assert_eq!(unavailable.kind(), ErrorKind::Session);
        let not_found = Error::HttpStatus {
            endpoint: "/api/ekd/read".into(),
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(not_found.kind(), ErrorKind::Connection);
    }

    #[test]
    fn endpoint_names_do_not_count_as_session_errors() {
        let error = Error::MissingKey("/api/sessionDevice".into(), "sessionDevice");
        assert!(!error.is_session_error());
    }

    #[test]
    fn wrong_id() {
        assert!(device_status("wrong_id").is_wrong_id());
        assert!(!device_status("SESSION").is_wrong_id());
    }
}
