//! The probe façade: one `ping` per dial option, `ping_link` on top of
//! the share-link parsers and the retry controller.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use rp_core::error::{ProbeError, Result};
use rp_core::probe::{probe_stream, PROBE_HOST, PROBE_PORT, PROBE_TIMEOUT};
use rp_core::retry::RetryPolicy;
use rp_core::{Metadata, ProxyOption};

use crate::outbound::shadowsocks::ShadowsocksConnector;
use crate::outbound::ssr::ShadowsocksRConnector;
use crate::outbound::trojan::TrojanConnector;
use crate::outbound::vmess::VmessConnector;
use crate::traits::{DialOpts, OutboundConnector};

/// Backoff seed used by `ping_link` between attempts.
const LINK_RETRY_BASE: Duration = Duration::from_millis(120);

/// Builds the connector matching the option variant.
pub fn build_connector(option: &ProxyOption) -> Result<Box<dyn OutboundConnector>> {
    Ok(match option {
        ProxyOption::Shadowsocks(o) => Box::new(ShadowsocksConnector::new(o, None)?),
        ProxyOption::ShadowsocksR(o) => Box::new(ShadowsocksRConnector::new(o, None)?),
        ProxyOption::Vmess(o) => Box::new(VmessConnector::new(o, None)?),
        ProxyOption::Trojan(o) => Box::new(TrojanConnector::new(o, None)?),
    })
}

/// Probes one relay: dial + handshake + HTTP round-trip, all inside the
/// 2400 ms budget. Returns elapsed milliseconds for the HTTP exchange.
pub async fn ping(option: &ProxyOption) -> Result<u64> {
    ping_with(option, &CancellationToken::new()).await
}

/// `ping` with an external cancellation token.
pub async fn ping_with(option: &ProxyOption, cancel: &CancellationToken) -> Result<u64> {
    let connector = build_connector(option)?;
    let meta = Metadata::tcp(PROBE_HOST, PROBE_PORT);
    let opts = DialOpts {
        timeout: PROBE_TIMEOUT,
        cancel: cancel.clone(),
    };

    let attempt = async {
        let conn = connector.dial_context(&opts, &meta).await?;
        probe_stream(conn).await
    };

    let elapsed = tokio::select! {
        _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
        out = tokio::time::timeout(PROBE_TIMEOUT, attempt) => out
            .map_err(|_| ProbeError::Timeout)??,
    };
    debug!(server = option.server(), elapsed_ms = elapsed, "probe ok");
    Ok(elapsed)
}

/// Parses a share link and probes it with up to `attempts` tries under
/// exponential backoff.
pub async fn ping_link(link: &str, attempts: u32) -> Result<u64> {
    ping_link_with(link, attempts, &CancellationToken::new()).await
}

/// `ping_link` with an external cancellation token.
pub async fn ping_link_with(
    link: &str,
    attempts: u32,
    cancel: &CancellationToken,
) -> Result<u64> {
    let option = rp_links::parse_link(link)?;
    RetryPolicy::new(attempts, LINK_RETRY_BASE)
        .run(cancel, || ping_with(&option, cancel))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_core::options::{SsOption, TrojanOption};

    #[test]
    fn builds_every_variant() {
        let ss = ProxyOption::Shadowsocks(SsOption {
            server: "127.0.0.1".into(),
            port: 8388,
            password: "pw".into(),
            cipher: "aes-256-gcm".into(),
            plugin: None,
            plugin_opts: None,
            remark: None,
        });
        assert_eq!(build_connector(&ss).unwrap().name(), "shadowsocks");

        let trojan = ProxyOption::Trojan(TrojanOption {
            server: "relay.example.com".into(),
            port: 443,
            password: "pw".into(),
            sni: None,
            alpn: vec![],
            skip_cert_verify: true,
            remark: None,
        });
        assert_eq!(build_connector(&trojan).unwrap().name(), "trojan");
    }

    #[test]
    fn bad_cipher_surfaces_unsupported_config() {
        let ss = ProxyOption::Shadowsocks(SsOption {
            server: "127.0.0.1".into(),
            port: 8388,
            password: "pw".into(),
            cipher: "rot13".into(),
            plugin: None,
            plugin_opts: None,
            remark: None,
        });
        assert!(matches!(
            build_connector(&ss),
            Err(ProbeError::UnsupportedConfig(_))
        ));
    }

    #[tokio::test]
    async fn ping_link_rejects_garbage_without_dialing() {
        let err = ping_link("ftp://nope", 3).await.unwrap_err();
        assert!(matches!(err, ProbeError::BadLink(_)));
    }
}
