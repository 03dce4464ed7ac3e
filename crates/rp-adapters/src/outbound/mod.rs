//! Outbound connector implementations.
//!
//! One module per protocol; each keeps its cipher state inside the
//! stream it returns, so dropping the stream releases everything.

pub mod shadowsocks;
pub mod ssr;
pub mod trojan;
pub mod vmess;

pub(crate) mod iohelper;

use rp_core::Metadata;

pub(crate) fn span_dial(adapter: &'static str, meta: &Metadata) -> tracing::Span {
    tracing::info_span!("dial", adapter = adapter, dest = %meta)
}
