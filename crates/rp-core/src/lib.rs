//! Core building blocks for the relay prober.
//!
//! This crate carries everything the protocol connectors share:
//! the probe error model, dial metadata and the SOCKS-style address
//! codec, the crypto primitives used by Shadowsocks/SSR/VMess, the
//! resolver interface, the retry controller and the probe driver
//! itself. It stays independent of any concrete outbound protocol.

pub mod crypto;
pub mod dns;
pub mod error;
pub mod options;
pub mod probe;
pub mod retry;
pub mod session;

pub use error::{ProbeError, Result};
pub use options::ProxyOption;
pub use session::{Addr, Metadata, NetworkKind};
