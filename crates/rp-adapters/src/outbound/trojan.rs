//! Trojan outbound connector.
//!
//! TLS to the relay (SNI defaults to the server host), then one request
//! head: `hex(sha224(password)) CRLF 0x01 addr CRLF`. The server sends
//! no challenge; the tunnel is transparent from the first payload byte.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha224};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use rp_core::dns::{default_resolver, Resolver};
use rp_core::error::{ProbeError, Result};
use rp_core::options::TrojanOption;
use rp_core::session::encode_addr;
use rp_core::Metadata;
use rp_transport::{TlsClient, TlsClientConfig};

use crate::traits::{connect_server, map_dial_error, BoxedStream, DialOpts, OutboundConnector};

/// Trojan CONNECT command byte.
const CMD_CONNECT: u8 = 0x01;

/// Trojan outbound connector.
pub struct TrojanConnector {
    server: String,
    port: u16,
    /// 56 lowercase hex chars of SHA-224(password), as sent on the wire.
    password_hex: String,
    tls: TlsClient,
    resolver: Arc<dyn Resolver>,
}

impl std::fmt::Debug for TrojanConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrojanConnector")
            .field("server", &self.server)
            .field("port", &self.port)
            .finish()
    }
}

impl TrojanConnector {
    pub fn new(option: &TrojanOption, resolver: Option<Arc<dyn Resolver>>) -> Result<Self> {
        let tls = TlsClient::new(&TlsClientConfig {
            server_name: option
                .sni
                .clone()
                .unwrap_or_else(|| option.server.clone()),
            alpn: option.alpn.clone(),
            skip_verify: option.skip_cert_verify,
        })
        .map_err(map_dial_error)?;

        Ok(Self {
            server: option.server.clone(),
            port: option.port,
            password_hex: hash_password(&option.password),
            tls,
            resolver: resolver.unwrap_or_else(default_resolver),
        })
    }
}

/// SHA-224 of the password rendered as lowercase hex.
fn hash_password(password: &str) -> String {
    let mut hasher = Sha224::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl OutboundConnector for TrojanConnector {
    fn name(&self) -> &'static str {
        "trojan"
    }

    async fn dial_context(&self, opts: &DialOpts, meta: &Metadata) -> Result<BoxedStream> {
        let _span = crate::outbound::span_dial("trojan", meta);
        let tcp = connect_server(&self.resolver, &self.server, self.port, opts).await?;

        let handshake = async {
            let mut stream = self
                .tls
                .handshake(Box::new(tcp))
                .await
                .map_err(map_dial_error)?;

            let mut request = Vec::with_capacity(64 + self.password_hex.len());
            request.extend_from_slice(self.password_hex.as_bytes());
            request.extend_from_slice(b"\r\n");
            request.push(CMD_CONNECT);
            encode_addr(&meta.addr, meta.port, &mut request);
            request.extend_from_slice(b"\r\n");

            stream
                .write_all(&request)
                .await
                .map_err(|e| ProbeError::HandshakeFail(format!("trojan request write: {e}")))?;
            stream
                .flush()
                .await
                .map_err(|e| ProbeError::HandshakeFail(format!("trojan request flush: {e}")))?;
            Ok::<_, ProbeError>(stream)
        };

        let stream = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(ProbeError::Cancelled),
            out = tokio::time::timeout(opts.timeout, handshake) => out
                .map_err(|_| ProbeError::Timeout)??,
        };
        debug!(server = %self.server, "trojan tunnel ready");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_digest_is_sha224_hex() {
        // sha224("pw"), independently computed.
        let hexed = hash_password("pw");
        assert_eq!(hexed.len(), 56);
        assert_eq!(
            hexed,
            "bebeef056d2fc0c96fbdd3372c8b766a0d3b5bac45cc56a4f15235cd"
        );
        assert!(hexed.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn connector_rejects_bad_sni() {
        let option = TrojanOption {
            server: "relay.example.com".into(),
            port: 443,
            password: "pw".into(),
            sni: Some("spaces are invalid".into()),
            alpn: vec![],
            skip_cert_verify: true,
            remark: None,
        };
        assert!(TrojanConnector::new(&option, None).is_err());
    }
}
