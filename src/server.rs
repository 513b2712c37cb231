//! The server object: validated bind options, an optional TLS context and
//! listener creation.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::config::{self, ListenerOptions, ServerOptions, TlsOptions};
use crate::error::{ListenerError, ServerError};
use crate::handler::InboundHandler;
use crate::inbound::{BindOptions, Inbound};

/// Shared configuration for any number of listeners.
///
/// ```no_run
/// use hl7_mllp_server::{handler_fn, AckCode, Hl7Server, ListenerOptions, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Hl7Server::new(ServerOptions::default())?;
///     let inbound = server.create_inbound(
///         ListenerOptions::new(2575),
///         handler_fn(|_request, mut response| async move {
///             let _ = response.send_response(AckCode::AA).await;
///         }),
///     )?;
///     inbound.wait_listening().await;
///     Ok(())
/// }
/// ```
pub struct Hl7Server {
    options: ServerOptions,
    tls: Option<TlsAcceptor>,
}

impl Hl7Server {
    /// Validates the options and prepares the TLS context when one is
    /// configured. No socket is touched until a listener is created.
    pub fn new(options: ServerOptions) -> Result<Hl7Server, ServerError> {
        let options = config::normalize_server_options(options)?;
        let tls = match options.tls.as_ref() {
            Some(tls) => Some(build_tls_acceptor(tls)?),
            None => None,
        };
        Ok(Hl7Server { options, tls })
    }

    /// Creates a listener with its own port, name, encoding and handler,
    /// and starts it immediately. Must be called from within a Tokio
    /// runtime.
    pub fn create_inbound<H>(
        &self,
        options: ListenerOptions,
        handler: H,
    ) -> Result<Inbound, ListenerError>
    where
        H: InboundHandler,
    {
        let config = config::normalize_listener_options(options)?;
        let bind = BindOptions {
            address: self.options.bind_address.clone(),
            ipv6_only: self.options.ipv6,
            tls: self.tls.clone(),
        };
        Ok(Inbound::start(bind, config, Arc::new(handler)))
    }

    pub fn bind_address(&self) -> &str {
        &self.options.bind_address
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

fn build_tls_acceptor(tls: &TlsOptions) -> Result<TlsAcceptor, ServerError> {
    let tls_error = |e: &dyn std::fmt::Display| ServerError::TlsConfig(e.to_string());

    if tls.request_client_cert && tls.client_ca_roots.is_empty() {
        // rustls has no implicit trust store for client certificates
        return Err(ServerError::TlsConfig(
            "requesting client certificates needs at least one trusted root".to_string(),
        ));
    }

    let cert_chain: Vec<CertificateDer<'static>> = tls
        .cert_chain
        .iter()
        .map(|der| CertificateDer::from(der.clone()))
        .collect();
    let key = PrivateKeyDer::try_from(tls.key.clone()).map_err(|e| tls_error(&e))?;

    let builder = ServerConfig::builder();
    let builder = if !tls.request_client_cert {
        builder.with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        for der in &tls.client_ca_roots {
            roots
                .add(CertificateDer::from(der.clone()))
                .map_err(|e| tls_error(&e))?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| tls_error(&e))?;
        builder.with_client_cert_verifier(verifier)
    };

    let server_config = builder
        .with_single_cert(cert_chain, key)
        .map_err(|e| tls_error(&e))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_default_server_needs_no_tls() {
        let server = Hl7Server::new(ServerOptions::default()).unwrap();
        assert!(!server.tls_enabled());
        assert_eq!(server.bind_address(), "0.0.0.0");
    }

    #[test]
    fn invalid_options_are_rejected_up_front() {
        let opts = ServerOptions {
            ipv4: true,
            ipv6: true,
            ..Default::default()
        };
        assert!(matches!(
            Hl7Server::new(opts),
            Err(ServerError::BothProtocolsEnabled)
        ));
    }

    #[test]
    fn garbage_key_material_is_rejected() {
        let opts = ServerOptions {
            tls: Some(TlsOptions {
                cert_chain: vec![b"not a certificate".to_vec()],
                key: b"not a key".to_vec(),
                request_client_cert: false,
                client_ca_roots: Vec::new(),
            }),
            ..Default::default()
        };
        assert!(matches!(Hl7Server::new(opts), Err(ServerError::TlsConfig(_))));
    }

    #[test]
    fn requesting_client_certs_without_roots_is_rejected() {
        let opts = ServerOptions {
            tls: Some(TlsOptions {
                cert_chain: vec![b"not a certificate".to_vec()],
                key: b"not a key".to_vec(),
                request_client_cert: true,
                client_ca_roots: Vec::new(),
            }),
            ..Default::default()
        };
        match Hl7Server::new(opts) {
            Err(ServerError::TlsConfig(reason)) => assert!(reason.contains("trusted root")),
            other => panic!("expected a tls config error, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn listeners_inherit_validation_from_their_options() {
        let server = Hl7Server::new(ServerOptions::default()).unwrap();

        let mut bad = ListenerOptions::new(2575);
        bad.name = Some("not allowed".to_string());
        let result = server.create_inbound(
            bad,
            crate::handler::handler_fn(|_request, _response| async {}),
        );
        assert!(matches!(result, Err(ListenerError::InvalidName(_))));
    }
}
