//! Share-link parsing: `ss://`, `ssr://`, `vmess://` and `trojan://`
//! URIs in and typed dial options out, plus re-encoders so a parsed
//! option can be turned back into a link.
//!
//! Every parser tolerates both base64 alphabets and optional padding,
//! rejects ports outside 1..=65535, and answers structural problems
//! with `BadLink` instead of panicking.

mod base64util;
mod ss;
mod ssr;
mod trojan;
mod vmess;

pub use ss::{encode_ss_link, parse_ss_link};
pub use ssr::{encode_ssr_link, parse_ssr_link};
pub use trojan::{encode_trojan_link, parse_trojan_link};
pub use vmess::{encode_vmess_link, parse_vmess_link};

use rp_core::error::{ProbeError, Result};
use rp_core::options::ProxyOption;

const SCHEMES: [&str; 4] = ["vmess", "ssr", "ss", "trojan"];

/// Returns the scheme when `input` looks like a supported share link.
/// This is the cheap sniff the CLI runs over its arguments.
#[must_use]
pub fn check_link(input: &str) -> Option<&'static str> {
    let input = input.trim();
    SCHEMES
        .iter()
        .find(|s| {
            input.len() > s.len() + 3
                && input
                    .get(..s.len() + 3)
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(&format!("{s}://")))
        })
        .copied()
}

/// Parses any supported share link into its typed option.
pub fn parse_link(input: &str) -> Result<ProxyOption> {
    let input = input.trim();
    let parsed = match check_link(input) {
        Some("ss") => parse_ss_link(input).map(ProxyOption::Shadowsocks),
        Some("ssr") => parse_ssr_link(input).map(ProxyOption::ShadowsocksR),
        Some("vmess") => parse_vmess_link(input).map(ProxyOption::Vmess),
        Some("trojan") => parse_trojan_link(input).map(ProxyOption::Trojan),
        _ => Err(ProbeError::bad_link("unknown link scheme")),
    };
    match &parsed {
        Ok(option) => tracing::debug!(
            scheme = option.scheme(),
            server = option.server(),
            "parsed share link"
        ),
        Err(err) => tracing::debug!(%err, "rejected share link"),
    }
    parsed
}

/// Re-encodes an option into its share link.
#[must_use]
pub fn encode_link(option: &ProxyOption) -> String {
    match option {
        ProxyOption::Shadowsocks(o) => encode_ss_link(o),
        ProxyOption::ShadowsocksR(o) => encode_ssr_link(o),
        ProxyOption::Vmess(o) => encode_vmess_link(o),
        ProxyOption::Trojan(o) => encode_trojan_link(o),
    }
}

/// Splits `host:port`, handling bracketed IPv6 literals, validating the
/// port range.
pub(crate) fn parse_host_port(input: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| ProbeError::bad_link("unterminated ipv6 literal"))?;
        let host = &rest[..end];
        let port = rest[end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| ProbeError::bad_link("missing port after ipv6 literal"))?;
        (host.to_string(), port)
    } else {
        let colon = input
            .rfind(':')
            .ok_or_else(|| ProbeError::bad_link("missing port"))?;
        (input[..colon].to_string(), &input[colon + 1..])
    };
    if host.is_empty() {
        return Err(ProbeError::bad_link("empty host"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ProbeError::bad_link(format!("bad port {port:?}")))?;
    if port == 0 {
        return Err(ProbeError::bad_link("port must be 1..=65535"));
    }
    Ok((host, port))
}

/// Splits a query string into decoded key/value pairs.
pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            let (k, v) = kv.split_once('=').unwrap_or((kv, ""));
            (
                urlencoding::decode(k).map(|s| s.into_owned()).unwrap_or_else(|_| k.to_string()),
                urlencoding::decode(v).map(|s| s.into_owned()).unwrap_or_else(|_| v.to_string()),
            )
        })
        .collect()
}
