//! Typed dial options, one per supported protocol, plus the tagged
//! `ProxyOption` the dispatch façade matches on. Link parsers produce
//! these; connectors validate the cipher/uuid fields when they are
//! constructed.

use serde::{Deserialize, Serialize};

/// Shadowsocks outbound settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsOption {
    pub server: String,
    pub port: u16,
    pub password: String,
    /// Cipher name, e.g. `aes-256-gcm` or `rc4-md5`.
    pub cipher: String,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub plugin_opts: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// ShadowsocksR outbound settings: the SS fields plus the plugin pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsrOption {
    pub server: String,
    pub port: u16,
    pub password: String,
    /// Stream cipher name; AEAD methods are not valid here.
    pub cipher: String,
    pub protocol: String,
    #[serde(default)]
    pub protocol_param: Option<String>,
    pub obfs: String,
    #[serde(default)]
    pub obfs_param: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

/// VMess transport selector carried by share links. Only `Tcp` is
/// dialable by the probe; the rest are parsed and reported as
/// unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmessNetwork {
    Tcp,
    Ws,
    H2,
    Grpc,
}

impl Default for VmessNetwork {
    fn default() -> Self {
        Self::Tcp
    }
}

impl VmessNetwork {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "tcp" => Some(Self::Tcp),
            "ws" | "websocket" => Some(Self::Ws),
            "h2" | "http" => Some(Self::H2),
            "grpc" => Some(Self::Grpc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ws => "ws",
            Self::H2 => "h2",
            Self::Grpc => "grpc",
        }
    }
}

/// VMess outbound settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmessOption {
    pub server: String,
    pub port: u16,
    /// User id; must parse as a 128-bit UUID.
    pub uuid: String,
    /// 0 selects AEAD request headers unless `aead` overrides.
    pub alter_id: u16,
    /// Security name: `aes-128-gcm`, `chacha20-poly1305`, `none`, `auto`.
    pub security: String,
    #[serde(default)]
    pub network: VmessNetwork,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub ws_path: Option<String>,
    #[serde(default)]
    pub ws_host: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    /// Explicit header-mode override; `None` falls back to
    /// `alter_id == 0`.
    #[serde(default)]
    pub aead: Option<bool>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl VmessOption {
    /// Whether the request header uses the sealed AEAD construction.
    #[must_use]
    pub fn use_aead_header(&self) -> bool {
        self.aead.unwrap_or(self.alter_id == 0)
    }
}

/// Trojan outbound settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrojanOption {
    pub server: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub sni: Option<String>,
    #[serde(default)]
    pub alpn: Vec<String>,
    #[serde(default)]
    pub skip_cert_verify: bool,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Tagged dial option. Dispatch matches once; there is no config an
/// encoder can produce that this enum cannot represent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProxyOption {
    Shadowsocks(SsOption),
    ShadowsocksR(SsrOption),
    Vmess(VmessOption),
    Trojan(TrojanOption),
}

impl ProxyOption {
    /// Server host the option dials.
    #[must_use]
    pub fn server(&self) -> &str {
        match self {
            Self::Shadowsocks(o) => &o.server,
            Self::ShadowsocksR(o) => &o.server,
            Self::Vmess(o) => &o.server,
            Self::Trojan(o) => &o.server,
        }
    }

    /// Remark / tag carried by the share link, if any.
    #[must_use]
    pub fn remark(&self) -> Option<&str> {
        match self {
            Self::Shadowsocks(o) => o.remark.as_deref(),
            Self::ShadowsocksR(o) => o.remark.as_deref(),
            Self::Vmess(o) => o.remark.as_deref(),
            Self::Trojan(o) => o.remark.as_deref(),
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Shadowsocks(_) => "ss",
            Self::ShadowsocksR(_) => "ssr",
            Self::Vmess(_) => "vmess",
            Self::Trojan(_) => "trojan",
        }
    }
}
