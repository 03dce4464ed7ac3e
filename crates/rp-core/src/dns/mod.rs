//! Pluggable hostname resolution.
//!
//! Connectors take an explicit `Arc<dyn Resolver>`; the process-wide
//! default slot exists as a convenience wrapper and is write-once at
//! startup, read-only afterwards.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::error::{ProbeError, Result};

/// Hostname → IP lookup consumed by the dialers.
#[async_trait]
pub trait Resolver: Send + Sync + std::fmt::Debug {
    /// Resolves to a single address, the one the dialer will connect to.
    async fn resolve(&self, host: &str) -> Result<IpAddr>;

    /// Resolves to every address the name maps to.
    async fn resolve_all(&self, host: &str) -> Result<Vec<IpAddr>> {
        Ok(vec![self.resolve(host).await?])
    }
}

/// Resolver backed by the system stack via tokio's `lookup_host`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addrs = lookup(host).await?;
        addrs
            .next()
            .map(|sa| sa.ip())
            .ok_or_else(|| ProbeError::ResolveFail(format!("no addresses for {host}")))
    }

    async fn resolve_all(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let addrs = lookup(host).await?;
        let ips: Vec<IpAddr> = addrs.map(|sa| sa.ip()).collect();
        if ips.is_empty() {
            return Err(ProbeError::ResolveFail(format!("no addresses for {host}")));
        }
        Ok(ips)
    }
}

async fn lookup(host: &str) -> Result<impl Iterator<Item = SocketAddr> + use<'_>> {
    // Port is irrelevant for the lookup; lookup_host requires one.
    tokio::net::lookup_host((host, 0u16))
        .await
        .map_err(|e| ProbeError::ResolveFail(format!("{host}: {e}")))
}

static DEFAULT_RESOLVER: OnceLock<Arc<dyn Resolver>> = OnceLock::new();

/// Installs the process-wide default resolver. The first call wins;
/// later calls return `false` and change nothing.
pub fn set_default_resolver(resolver: Arc<dyn Resolver>) -> bool {
    DEFAULT_RESOLVER.set(resolver).is_ok()
}

/// The process-wide default resolver, installing `SystemResolver` on
/// first use when startup never set one.
#[must_use]
pub fn default_resolver() -> Arc<dyn Resolver> {
    DEFAULT_RESOLVER
        .get_or_init(|| Arc::new(SystemResolver))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_ips_resolve_without_dns() {
        let r = SystemResolver;
        assert_eq!(
            r.resolve("127.0.0.1").await.unwrap(),
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(r.resolve_all("::1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn default_slot_is_write_once() {
        let first = default_resolver();
        assert!(!set_default_resolver(Arc::new(SystemResolver)));
        // Slot keeps serving the original value.
        assert!(Arc::ptr_eq(&first, &default_resolver()));
    }
}
