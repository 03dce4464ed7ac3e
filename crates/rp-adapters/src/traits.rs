//! Connector contract and shared dial plumbing.

use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rp_core::dns::Resolver;
use rp_core::error::{ProbeError, Result};
use rp_core::probe::PROBE_TIMEOUT;
use rp_core::Metadata;
use rp_transport::{DialError, IoStream};

/// Stream handed back by a connector: the tunnel, already past its
/// protocol handshake writes.
pub type BoxedStream = IoStream;

/// Options for one dial: the deadline budget and the external
/// cancellation token, both propagated into every I/O call.
#[derive(Debug, Clone)]
pub struct DialOpts {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl Default for DialOpts {
    fn default() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outbound dialer contract consumed by the probe.
#[async_trait]
pub trait OutboundConnector: Send + Sync + Debug {
    /// Connector type for logging.
    fn name(&self) -> &'static str;

    /// Opens a tunnel that terminates at `meta`, honouring the deadline
    /// and cancellation in `opts`. The socket is released on every
    /// failure path.
    async fn dial_context(&self, opts: &DialOpts, meta: &Metadata) -> Result<BoxedStream>;
}

/// Resolves the relay host with the injected resolver and opens the TCP
/// connection, mapping each failure to its specific kind.
pub(crate) async fn connect_server(
    resolver: &Arc<dyn Resolver>,
    server: &str,
    port: u16,
    opts: &DialOpts,
) -> Result<tokio::net::TcpStream> {
    let ip: IpAddr = match server.parse() {
        Ok(ip) => ip,
        Err(_) => resolver.resolve(server).await?,
    };

    let connect = tokio::net::TcpStream::connect((ip, port));
    let stream = tokio::select! {
        _ = opts.cancel.cancelled() => return Err(ProbeError::Cancelled),
        out = tokio::time::timeout(opts.timeout, connect) => out
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|e| ProbeError::DialFail(format!("{server}:{port}: {e}")))?,
    };
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Maps transport-layer failures onto probe error kinds.
pub(crate) fn map_dial_error(err: DialError) -> ProbeError {
    match err {
        DialError::Io(e) => ProbeError::DialFail(e.to_string()),
        DialError::Tls(msg) => ProbeError::TlsFail(msg),
        DialError::Timeout => ProbeError::Timeout,
        DialError::Cancelled => ProbeError::Cancelled,
        DialError::Other(msg) => ProbeError::DialFail(msg),
    }
}
