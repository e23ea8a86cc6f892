//! mTLS connection acceptor.
//!
//! Wraps the raw TCP accept step with a TLS handshake against the control
//! plane's own CA, then inserts the result — a client certificate's serial
//! and common name, or `None` if the peer presented no certificate — as a
//! request extension so handlers can require it with [`require_identity`].

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use axum_server::accept::Accept;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tower::Layer;
use tower_http::add_extension::{AddExtension, AddExtensionLayer};

use crate::error::AppError;

/// The decimal-rendered serial and parsed common name of a verified client
/// certificate, present on every request's extensions once it passes
/// through [`MtlsAcceptor`] — `None` when the peer presented no certificate.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity(pub Option<VerifiedClient>);

/// One verified client certificate's identifying fields.
#[derive(Debug, Clone)]
pub struct VerifiedClient {
    /// Decimal-rendered certificate serial, matching the format `nkudo_core::pki`
    /// issues (§6 wire format) — directly comparable to `agents.cert_serial`.
    pub serial_decimal: String,
    pub common_name: String,
}

impl ClientIdentity {
    /// Require that this request presented a client certificate.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthorized`] if no certificate was presented.
    pub fn require(&self) -> Result<&VerifiedClient, AppError> {
        self.0
            .as_ref()
            .ok_or_else(|| AppError::Unauthorized("client certificate required".to_owned()))
    }
}

/// TLS acceptor that terminates mTLS and exposes the peer's certificate (if
/// any) to downstream handlers.
#[derive(Clone)]
pub struct MtlsAcceptor {
    inner: TlsAcceptor,
}

impl MtlsAcceptor {
    #[must_use]
    pub fn new(server_config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            inner: TlsAcceptor::from(server_config),
        }
    }
}

impl<S> Accept<TcpStream, S> for MtlsAcceptor
where
    S: Send + 'static,
{
    type Stream = TlsStream<TcpStream>;
    type Service = AddExtension<S, ClientIdentity>;
    type Future = Pin<Box<dyn Future<Output = io::Result<(Self::Stream, Self::Service)>> + Send>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let tls_stream = acceptor.accept(stream).await?;
            let identity = identity_from_stream(&tls_stream);
            let service = AddExtensionLayer::new(identity).layer(service);
            Ok((tls_stream, service))
        })
    }
}

fn identity_from_stream(stream: &TlsStream<TcpStream>) -> ClientIdentity {
    let (_, conn) = stream.get_ref();
    let Some(certs) = conn.peer_certificates() else {
        return ClientIdentity(None);
    };
    let Some(leaf) = certs.first() else {
        return ClientIdentity(None);
    };

    match x509_parser::parse_x509_certificate(leaf.as_ref()) {
        Ok((_, cert)) => {
            let serial_decimal = decimal_serial(cert.tbs_certificate.raw_serial());
            let common_name = cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .unwrap_or_default()
                .to_owned();
            ClientIdentity(Some(VerifiedClient {
                serial_decimal,
                common_name,
            }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse peer certificate, treating as unauthenticated");
            ClientIdentity(None)
        }
    }
}

/// Render a raw (big-endian) ASN.1 serial as the decimal string used
/// throughout the PKI and storage layers. Our own issuance never emits more
/// than 16 bytes of serial (a `u128`), so larger inputs are truncated to
/// their trailing 16 bytes rather than mis-parsed.
fn decimal_serial(raw: &[u8]) -> String {
    let mut buf = [0u8; 16];
    let take = raw.len().min(16);
    buf[16 - take..].copy_from_slice(&raw[raw.len() - take..]);
    u128::from_be_bytes(buf).to_string()
}
