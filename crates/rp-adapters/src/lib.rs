//! Outbound connectors for the four supported relay protocols and the
//! probe dispatch façade built on top of them.

pub mod outbound;
pub mod probe;
pub mod traits;

pub use probe::{build_connector, ping, ping_link, ping_link_with, ping_with};
pub use traits::{BoxedStream, DialOpts, OutboundConnector};
