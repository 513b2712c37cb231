//! Error types surfaced by the server, its listeners and the HL7 parser.

use thiserror::Error;

use crate::hl7::Hl7ParseError;

/// Errors raised while validating server-wide options or preparing TLS.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A server binds one address family at a time.
    #[error("ipv4 and ipv6 cannot both be enabled on the same server")]
    BothProtocolsEnabled,

    /// The bind address failed to parse as an address of the enabled family.
    #[error("bind address {address:?} is not a valid {family} address")]
    InvalidBindAddress {
        address: String,
        family: &'static str,
    },

    /// The supplied key/certificate material was rejected by rustls.
    #[error("tls configuration rejected: {0}")]
    TlsConfig(String),
}

/// Errors raised while creating a listener or responding to a request.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("port {0} is outside the accepted range 0-65353")]
    PortOutOfRange(u16),

    #[error("listener name {0:?} contains forbidden characters")]
    InvalidName(String),

    /// Override paths address an MSH field (`"9"`) or field.component (`"9.3"`).
    #[error("MSH override path {0:?} is not a valid field or field.component address")]
    InvalidOverridePath(String),

    /// At most one acknowledgement may be sent per received message.
    #[error("a response has already been sent for this message")]
    ResponseAlreadySent,
}

/// Non-fatal problems with inbound data, reported as [`data
/// error`](crate::InboundEvent::DataError) events while the connection
/// carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// The frame payload could not be decoded with the listener's text
    /// encoding.
    #[error("frame payload is not valid {encoding}: {reason}")]
    Encoding {
        encoding: &'static str,
        reason: String,
    },

    /// A unit (or one message inside a batch) failed to parse as HL7.
    #[error(transparent)]
    Parse(#[from] Hl7ParseError),
}
