//! TLS for explicit (`AUTH TLS`) and implicit FTPS (RFC 4217).
//!
//! One connector is built per client and reused for every data channel so
//! servers that insist on TLS session reuse accept the data connections.

use crate::ftp::protocol::FtpCodec;
use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use xfer_core::{FsError, FsResult};

pub fn build_connector(accept_invalid_certs: bool) -> FsResult<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| FsError::invalid_config(format!("TLS setup: {}", e)))?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            warn!("skipping native certificate source: {}", err);
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!("loaded {} native root certificates ({} ignored)", added, ignored);
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

fn server_name(host: &str) -> FsResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| FsError::invalid_config(format!("invalid TLS server name '{}': {}", host, e)))
}

pub async fn connect(connector: &TlsConnector, host: &str, tcp: TcpStream) -> FsResult<TlsStream<TcpStream>> {
    connector
        .connect(server_name(host)?, tcp)
        .await
        .map_err(|e| FsError::connection_failed(format!("TLS handshake with {}: {}", host, e)))
}

/// Upgrade a plain control connection after a positive `AUTH TLS` reply.
pub async fn upgrade(codec: FtpCodec, connector: &TlsConnector, host: &str) -> FsResult<FtpCodec> {
    let (tcp, reply_timeout, verbose) = codec.into_plain_stream()?;
    let tls = connect(connector, host, tcp).await?;
    let mut codec = FtpCodec::from_tls(tls, reply_timeout);
    codec.set_verbose(verbose);
    Ok(codec)
}

// ─── NoCertVerifier (ignoreCertificateErrors) ───────────────────────

#[derive(Debug)]
struct NoCertVerifier;

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
