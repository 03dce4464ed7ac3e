//! Tracing setup driven by the `RP_LOG` environment variable.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global subscriber once; `RP_LOG` takes the usual
/// EnvFilter syntax (`debug`, `rp_adapters=trace`, …) and defaults to
/// warnings only.
pub fn init() {
    let filter = EnvFilter::try_from_env("RP_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}
