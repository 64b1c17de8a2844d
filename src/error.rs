//! Error types for lwm2m-client

use coap_lite::ResponseType;
use thiserror::Error;

/// Result type alias for lwm2m-client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the public API
#[derive(Error, Debug)]
pub enum Error {
    /// Node name is empty, too long or otherwise unusable
    #[error("Invalid node name: {0:?}")]
    InvalidName(String),

    /// Configuration file could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// A register/update/unregister request of this kind is already pending
    #[error("{0} request already in flight")]
    RequestInFlight(&'static str),

    /// Operation requires an active registration
    #[error("Client is not registered")]
    NotRegistered,

    /// No security object is available for the server session
    #[error("No security object configured")]
    MissingSecurity,

    /// Path does not resolve to a node of the tree
    #[error("No node at path {0:?}")]
    PathNotFound(String),

    /// Security object failed validation
    #[error("Security validation failed: {0}")]
    Security(String),

    /// CoAP message could not be built or parsed
    #[error("CoAP error: {0}")]
    Coap(String),

    /// TLV payload error
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 key material could not be decoded
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Structural errors raised by the TLV codec
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvError {
    /// Malformed type bits, truncated record or record in the wrong place
    #[error("TLV payload is not valid")]
    NotValid,

    /// Record addresses a node that does not exist
    #[error("TLV record addresses an unknown node")]
    NotFound,

    /// Record addresses a node that cannot be written
    #[error("TLV record addresses a node without write permission")]
    NotAllowed,
}

impl TlvError {
    /// CoAP response code sent back for this error
    pub fn response_code(self) -> ResponseType {
        match self {
            TlvError::NotValid => ResponseType::BadRequest,
            TlvError::NotFound => ResponseType::NotFound,
            TlvError::NotAllowed => ResponseType::MethodNotAllowed,
        }
    }
}

/// Protocol-level failures reported through [`crate::Observer::error`]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("server rejected the request parameters")]
    InvalidParameters,
    #[error("operation not allowed by the server")]
    NotAllowed,
    #[error("client is not registered with the server")]
    NotRegistered,
    #[error("network or server failure")]
    NetworkError,
    #[error("no response before the request timeout")]
    Timeout,
    #[error("bootstrap failed")]
    BootstrapFailed,
    #[error("unregistration failed")]
    UnregistrationFailed,
    #[error("server response could not be parsed")]
    ResponseParseFailed,
    #[error("unknown error")]
    UnknownError,
}

impl RegistrationError {
    /// Classify a failed registration-interface response code
    pub fn from_response(code: ResponseType) -> Self {
        match code {
            ResponseType::BadRequest => RegistrationError::InvalidParameters,
            ResponseType::Unauthorized
            | ResponseType::Forbidden
            | ResponseType::MethodNotAllowed => RegistrationError::NotAllowed,
            ResponseType::InternalServerError
            | ResponseType::NotImplemented
            | ResponseType::BadGateway
            | ResponseType::ServiceUnavailable
            | ResponseType::GatewayTimeout
            | ResponseType::ProxyingNotSupported => RegistrationError::NetworkError,
            _ => RegistrationError::UnknownError,
        }
    }
}
