//! `ssr://` links: one base64url blob of
//! `host:port:protocol:method:obfs:base64url(password)/?params`, where
//! obfsparam / protoparam / remarks / group values are themselves
//! base64url without padding.

use rp_core::crypto::is_stream_cipher;
use rp_core::error::{ProbeError, Result};
use rp_core::options::SsrOption;

use crate::base64util::{decode_any, decode_any_str, encode_url};
use crate::parse_query;

/// Protocol plugin names a link may carry.
const PROTOCOLS: [&str; 4] = ["origin", "auth_aes128_md5", "auth_aes128_sha1", "auth_chain_a"];

/// Obfuscation plugin names a link may carry.
const OBFS: [&str; 4] = ["plain", "http_simple", "http_post", "tls1.2_ticket_auth"];

pub fn parse_ssr_link(link: &str) -> Result<SsrOption> {
    let blob = link
        .strip_prefix("ssr://")
        .ok_or_else(|| ProbeError::bad_link("missing ssr:// prefix"))?;
    let decoded = decode_any_str(blob)?;

    let (main, query) = match decoded.split_once("/?") {
        Some((m, q)) => (m, parse_query(q)),
        None => (decoded.strip_suffix('/').unwrap_or(&decoded), Vec::new()),
    };

    // host:port:protocol:method:obfs:base64(password), rightmost-first so
    // IPv6 hosts with colons survive.
    let mut fields = main.rsplitn(6, ':');
    let password_b64 = fields.next();
    let obfs = fields.next();
    let method = fields.next();
    let protocol = fields.next();
    let port = fields.next();
    let host = fields.next();
    let (Some(password_b64), Some(obfs), Some(method), Some(protocol), Some(port), Some(host)) =
        (password_b64, obfs, method, protocol, port, host)
    else {
        return Err(ProbeError::bad_link("ssr body needs six fields"));
    };
    if host.is_empty() {
        return Err(ProbeError::bad_link("empty ssr host"));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| ProbeError::bad_link(format!("bad ssr port {port:?}")))?;
    if port == 0 {
        return Err(ProbeError::bad_link("port must be 1..=65535"));
    }

    let password = decode_inner(password_b64)?;

    if !is_stream_cipher(method) {
        return Err(ProbeError::bad_link(format!("ssr cipher {method} is not a stream cipher")));
    }
    if !PROTOCOLS.contains(&protocol) {
        return Err(ProbeError::bad_link(format!("unknown ssr protocol {protocol}")));
    }
    if !OBFS.contains(&obfs) {
        return Err(ProbeError::bad_link(format!("unknown ssr obfs {obfs}")));
    }

    let mut option = SsrOption {
        server: host.to_string(),
        port,
        password,
        cipher: method.to_string(),
        protocol: protocol.to_string(),
        protocol_param: None,
        obfs: obfs.to_string(),
        obfs_param: None,
        remark: None,
        group: None,
    };

    for (key, value) in query {
        if value.is_empty() {
            continue;
        }
        let value = decode_inner(&value)?;
        match key.as_str() {
            "obfsparam" => option.obfs_param = Some(value),
            "protoparam" => option.protocol_param = Some(value),
            "remarks" => option.remark = Some(value),
            "group" => option.group = Some(value),
            _ => {}
        }
    }

    Ok(option)
}

#[must_use]
pub fn encode_ssr_link(option: &SsrOption) -> String {
    let mut body = format!(
        "{}:{}:{}:{}:{}:{}",
        option.server,
        option.port,
        option.protocol,
        option.cipher,
        option.obfs,
        encode_url(option.password.as_bytes()),
    );
    let mut params = Vec::new();
    if let Some(v) = &option.obfs_param {
        params.push(format!("obfsparam={}", encode_url(v.as_bytes())));
    }
    if let Some(v) = &option.protocol_param {
        params.push(format!("protoparam={}", encode_url(v.as_bytes())));
    }
    if let Some(v) = &option.remark {
        params.push(format!("remarks={}", encode_url(v.as_bytes())));
    }
    if let Some(v) = &option.group {
        params.push(format!("group={}", encode_url(v.as_bytes())));
    }
    if !params.is_empty() {
        body.push_str("/?");
        body.push_str(&params.join("&"));
    }
    format!("ssr://{}", encode_url(body.as_bytes()))
}

/// Inner fields are base64url without padding, but links in the wild mix
/// alphabets here too.
fn decode_inner(value: &str) -> Result<String> {
    String::from_utf8(decode_any(value)?).map_err(|_| ProbeError::bad_link("ssr field is not utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SsrOption {
        SsrOption {
            server: "relay.example.com".into(),
            port: 8388,
            password: "p@ss".into(),
            cipher: "aes-256-cfb".into(),
            protocol: "auth_aes128_sha1".into(),
            protocol_param: Some("64:key".into()),
            obfs: "http_simple".into(),
            obfs_param: Some("download.windowsupdate.com".into()),
            remark: Some("jp-1".into()),
            group: Some("probe".into()),
        }
    }

    #[test]
    fn roundtrip() {
        let opt = sample();
        let back = parse_ssr_link(&encode_ssr_link(&opt)).unwrap();
        assert_eq!(back.server, opt.server);
        assert_eq!(back.port, opt.port);
        assert_eq!(back.password, opt.password);
        assert_eq!(back.cipher, opt.cipher);
        assert_eq!(back.protocol, opt.protocol);
        assert_eq!(back.protocol_param, opt.protocol_param);
        assert_eq!(back.obfs, opt.obfs);
        assert_eq!(back.obfs_param, opt.obfs_param);
        assert_eq!(back.remark, opt.remark);
        assert_eq!(back.group, opt.group);
    }

    #[test]
    fn parses_without_query() {
        let body = format!("h.example.org:443:origin:rc4-md5:plain:{}", encode_url(b"pw"));
        let link = format!("ssr://{}", encode_url(body.as_bytes()));
        let opt = parse_ssr_link(&link).unwrap();
        assert_eq!(opt.protocol, "origin");
        assert_eq!(opt.obfs, "plain");
        assert_eq!(opt.password, "pw");
        assert!(opt.protocol_param.is_none());
    }

    #[test]
    fn rejects_malformed_bodies() {
        // Too few fields.
        let link = format!("ssr://{}", encode_url(b"host:443:origin"));
        assert!(parse_ssr_link(&link).is_err());
        // AEAD cipher is invalid for ssr.
        let body = format!("h:443:origin:aes-256-gcm:plain:{}", encode_url(b"pw"));
        assert!(parse_ssr_link(&format!("ssr://{}", encode_url(body.as_bytes()))).is_err());
        // Unknown protocol.
        let body = format!("h:443:auth_sha1_v2:rc4-md5:plain:{}", encode_url(b"pw"));
        assert!(parse_ssr_link(&format!("ssr://{}", encode_url(body.as_bytes()))).is_err());
        // Bad outer base64.
        assert!(parse_ssr_link("ssr://!!!").is_err());
    }

    #[test]
    fn ipv6_host_survives_rsplit() {
        let body = format!("2001:db8::1:443:origin:rc4-md5:plain:{}", encode_url(b"pw"));
        let link = format!("ssr://{}", encode_url(body.as_bytes()));
        let opt = parse_ssr_link(&link).unwrap();
        assert_eq!(opt.server, "2001:db8::1");
        assert_eq!(opt.port, 443);
    }
}
