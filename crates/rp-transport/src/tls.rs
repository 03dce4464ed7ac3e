//! TLS client used by Trojan and TLS-wrapped VMess tunnels.
//!
//! Certificate verification uses the webpki root bundle; `skip_verify`
//! swaps in a no-op verifier for relays fronted by self-signed or
//! mismatched certificates (widespread in relay deployments, and what
//! share links express with `allowInsecure=1`).

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::dialer::{DialError, IoStream};

/// No-op certificate verifier (INSECURE - skips all verification).
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
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
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Ensures a rustls crypto provider is installed exactly once.
pub fn ensure_crypto_provider() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// TLS knobs carried by the protocol options.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// SNI; the caller defaults this to the relay host.
    pub server_name: String,
    pub alpn: Vec<String>,
    pub skip_verify: bool,
}

/// A configured TLS client; cheap to clone, reused per connector.
#[derive(Clone)]
pub struct TlsClient {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsClient {
    pub fn new(config: &TlsClientConfig) -> Result<Self, DialError> {
        ensure_crypto_provider();

        let mut tls_config = if config.skip_verify {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            let root_store = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
            };
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };
        if !config.alpn.is_empty() {
            tls_config.alpn_protocols =
                config.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
        }

        let server_name = ServerName::try_from(config.server_name.clone())
            .map_err(|e| DialError::Tls(format!("invalid server name: {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name,
        })
    }

    /// Runs the handshake over an established stream.
    pub async fn handshake(&self, stream: IoStream) -> Result<IoStream, DialError> {
        debug!(sni = ?self.server_name, "starting tls handshake");
        let tls_stream = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| DialError::Tls(format!("handshake failed: {e}")))?;
        Ok(Box::new(tls_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_both_verification_modes() {
        let verified = TlsClient::new(&TlsClientConfig {
            server_name: "relay.example.com".into(),
            alpn: vec!["h2".into(), "http/1.1".into()],
            skip_verify: false,
        });
        assert!(verified.is_ok());

        let insecure = TlsClient::new(&TlsClientConfig {
            server_name: "10.0.0.1".into(),
            alpn: vec![],
            skip_verify: true,
        });
        assert!(insecure.is_ok());
    }

    #[test]
    fn rejects_malformed_server_name() {
        let bad = TlsClient::new(&TlsClientConfig {
            server_name: "bad name with spaces".into(),
            alpn: vec![],
            skip_verify: true,
        });
        assert!(matches!(bad, Err(DialError::Tls(_))));
    }
}
