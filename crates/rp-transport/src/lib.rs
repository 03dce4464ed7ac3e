//! Transport layer: the dialer abstraction, plain TCP dialing with
//! deadline/cancellation, and the TLS client used by Trojan and
//! TLS-wrapped VMess tunnels.

pub mod dialer;
pub mod tls;
pub mod util;

pub use dialer::{AsyncReadWrite, DialError, Dialer, IoStream, TcpDialer};
pub use tls::{TlsClient, TlsClientConfig};
