//! Options for the server and its listeners, plus the validation applied
//! when they are handed in.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{DataError, ListenerError, ServerError};

/// Ports above this are rejected when a listener is created.
const MAX_PORT: u16 = 65353;

/// Characters a listener name may not contain.
const FORBIDDEN_NAME_CHARS: &str = " `!@#$%^&*()+-=[]{};':\"\\|,.<>/?~";

/// How a listener turns frame payload bytes into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Latin1 => "latin1",
        }
    }

    /// Decodes a frame payload. Failures are per-frame data errors, never
    /// connection errors.
    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<String, DataError> {
        match self {
            TextEncoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_string()),
                Err(e) => Err(DataError::Encoding {
                    encoding: self.name(),
                    reason: format!("invalid byte sequence at offset {}", e.valid_up_to()),
                }),
            },
            TextEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                None => Ok(bytes.iter().map(|b| *b as char).collect()),
                Some(i) => Err(DataError::Encoding {
                    encoding: self.name(),
                    reason: format!("byte 0x{:02X} at offset {}", bytes[i], i),
                }),
            },
            // latin1 maps each byte to the code point of the same value
            TextEncoding::Latin1 => Ok(bytes.iter().map(|b| *b as char).collect()),
        }
    }
}

/// TLS material for a server, all DER encoded.
#[derive(Clone)]
pub struct TlsOptions {
    /// Certificate chain presented to clients, leaf first.
    pub cert_chain: Vec<Vec<u8>>,
    /// Private key for the leaf certificate (PKCS#8, PKCS#1 or SEC1).
    pub key: Vec<u8>,
    /// Require clients to present a certificate. Needs
    /// [`client_ca_roots`](Self::client_ca_roots) to verify against.
    pub request_client_cert: bool,
    /// Roots used to verify client certificates. Ignored unless
    /// [`request_client_cert`](Self::request_client_cert) is set.
    pub client_ca_roots: Vec<Vec<u8>>,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("cert_chain", &format_args!("{} certificate(s)", self.cert_chain.len()))
            .field("key", &format_args!("{} byte(s)", self.key.len()))
            .field("request_client_cert", &self.request_client_cert)
            .field(
                "client_ca_roots",
                &format_args!("{} root(s)", self.client_ca_roots.len()),
            )
            .finish()
    }
}

/// Server-wide options, shared by every listener it creates.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address every listener binds on.
    pub bind_address: String,
    pub ipv4: bool,
    pub ipv6: bool,
    pub tls: Option<TlsOptions>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            bind_address: "0.0.0.0".to_string(),
            ipv4: true,
            ipv6: false,
            tls: None,
        }
    }
}

/// Per-listener options.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Port to listen on; 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// Listener name used in logs. Defaults to a random one.
    pub name: Option<String>,
    pub encoding: TextEncoding,
    /// `MSH` fields stamped onto every acknowledgement, as
    /// (`"field"` or `"field.component"`, value) pairs.
    pub msh_overrides: Vec<(String, String)>,
}

impl ListenerOptions {
    pub fn new(port: u16) -> ListenerOptions {
        ListenerOptions {
            port,
            name: None,
            encoding: TextEncoding::default(),
            msh_overrides: Vec::new(),
        }
    }
}

/// A parsed acknowledgement override, applied to the `MSH` segment of
/// every outgoing ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MshOverride {
    pub field: usize,
    pub component: Option<usize>,
    pub value: String,
}

/// Listener options after validation, with overrides parsed once.
#[derive(Debug, Clone)]
pub(crate) struct ListenerConfig {
    pub port: u16,
    pub name: String,
    pub encoding: TextEncoding,
    pub overrides: Arc<[MshOverride]>,
}

pub(crate) fn normalize_server_options(opts: ServerOptions) -> Result<ServerOptions, ServerError> {
    if opts.ipv4 && opts.ipv6 {
        return Err(ServerError::BothProtocolsEnabled);
    }
    // "localhost" resolves at bind time and may be either family
    if opts.bind_address != "localhost" {
        if opts.ipv6 && opts.bind_address.parse::<Ipv6Addr>().is_err() {
            return Err(ServerError::InvalidBindAddress {
                address: opts.bind_address,
                family: "IPv6",
            });
        }
        if opts.ipv4 && opts.bind_address.parse::<Ipv4Addr>().is_err() {
            return Err(ServerError::InvalidBindAddress {
                address: opts.bind_address,
                family: "IPv4",
            });
        }
    }
    Ok(opts)
}

pub(crate) fn normalize_listener_options(
    opts: ListenerOptions,
) -> Result<ListenerConfig, ListenerError> {
    if opts.port > MAX_PORT {
        return Err(ListenerError::PortOutOfRange(opts.port));
    }
    let name = match opts.name {
        Some(name) => {
            if name.chars().any(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
                return Err(ListenerError::InvalidName(name));
            }
            name
        }
        None => random_name(),
    };
    let overrides = opts
        .msh_overrides
        .iter()
        .map(|(path, value)| parse_override(path, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ListenerConfig {
        port: opts.port,
        name,
        encoding: opts.encoding,
        overrides: overrides.into(),
    })
}

fn parse_override(path: &str, value: &str) -> Result<MshOverride, ListenerError> {
    let invalid = || ListenerError::InvalidOverridePath(path.to_string());
    let mut parts = path.split('.');
    let field: usize = parts
        .next()
        .and_then(|p| p.parse().ok())
        .filter(|f| *f >= 1)
        .ok_or_else(invalid)?;
    let component = match parts.next() {
        Some(p) => Some(
            p.parse::<usize>()
                .ok()
                .filter(|c| *c >= 1)
                .ok_or_else(invalid)?,
        ),
        None => None,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(MshOverride {
        field,
        component,
        value: value.to_string(),
    })
}

fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
