//! ShadowsocksR outbound connector: a stream-cipher Shadowsocks tunnel
//! with a protocol plugin inside the cipher and an obfuscation plugin
//! outside it. Send order is payload → protocol → cipher → obfs; the
//! receive path reverses it.

pub(crate) mod obfs;
pub(crate) mod protocol;
mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rp_core::crypto::kdf::{derive_key, generate_salt};
use rp_core::crypto::stream::StreamCipherKind;
use rp_core::dns::{default_resolver, Resolver};
use rp_core::error::{ProbeError, Result};
use rp_core::options::SsrOption;
use rp_core::session::encode_addr;
use rp_core::Metadata;

use crate::traits::{connect_server, BoxedStream, DialOpts, OutboundConnector};
use stream::SsrStream;

/// Connection facts shared with both plugins at dial time.
pub(crate) struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub param: Option<String>,
    /// Send-direction cipher IV.
    pub iv: Vec<u8>,
    /// Cipher master key.
    pub key: Vec<u8>,
    /// Expected size of the leading address atom.
    pub head_size: usize,
    pub tcp_mss: usize,
    /// Client-side per-packet overhead advertised to the server.
    pub overhead: u16,
}

/// ShadowsocksR outbound connector.
pub struct ShadowsocksRConnector {
    option: SsrOption,
    kind: StreamCipherKind,
    master_key: Vec<u8>,
    resolver: Arc<dyn Resolver>,
}

impl std::fmt::Debug for ShadowsocksRConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowsocksRConnector")
            .field("server", &self.option.server)
            .field("port", &self.option.port)
            .field("protocol", &self.option.protocol)
            .field("obfs", &self.option.obfs)
            .finish()
    }
}

impl ShadowsocksRConnector {
    pub fn new(option: &SsrOption, resolver: Option<Arc<dyn Resolver>>) -> Result<Self> {
        let kind = StreamCipherKind::from_name(&option.cipher).ok_or_else(|| {
            ProbeError::UnsupportedConfig(format!(
                "ssr requires a stream cipher, got {}",
                option.cipher
            ))
        })?;
        // Resolve the plugin names now so a bad config fails before any
        // socket is opened.
        protocol::make_protocol(&option.protocol)?;
        obfs::make_obfs(&option.obfs)?;

        Ok(Self {
            option: option.clone(),
            kind,
            master_key: derive_key(&option.password, kind.key_len()),
            resolver: resolver.unwrap_or_else(default_resolver),
        })
    }
}

#[async_trait]
impl OutboundConnector for ShadowsocksRConnector {
    fn name(&self) -> &'static str {
        "shadowsocksr"
    }

    async fn dial_context(&self, opts: &DialOpts, meta: &Metadata) -> Result<BoxedStream> {
        let _span = crate::outbound::span_dial("shadowsocksr", meta);
        let tcp =
            connect_server(&self.resolver, &self.option.server, self.option.port, opts).await?;

        let iv = generate_salt(self.kind.iv_len());
        let mut proto = protocol::make_protocol(&self.option.protocol)?;
        let mut obfs = obfs::make_obfs(&self.option.obfs)?;

        let mut addr = Vec::new();
        encode_addr(&meta.addr, meta.port, &mut addr);

        let mut info = ServerInfo {
            host: self.option.server.clone(),
            port: self.option.port,
            param: self.option.protocol_param.clone(),
            iv: iv.clone(),
            key: self.master_key.clone(),
            head_size: addr.len(),
            tcp_mss: 1460,
            overhead: 0,
        };
        info.overhead = proto.overhead();
        proto.set_server_info(&info);
        info.param = self.option.obfs_param.clone();
        obfs.set_server_info(&info);

        debug!(
            cipher = self.kind.name(),
            protocol = %self.option.protocol,
            obfs = %self.option.obfs,
            "ssr tunnel ready"
        );
        Ok(Box::new(SsrStream::new(
            tcp,
            self.kind,
            self.master_key.clone(),
            iv,
            proto,
            obfs,
            addr,
        )))
    }
}
