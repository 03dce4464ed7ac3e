//! `ss://` links, both shapes in the wild:
//!
//! - legacy: `ss://base64(method:password@host:port)[#tag]`
//! - SIP002: `ss://base64(method:password)@host:port[?plugin=…][#tag]`,
//!   where the userinfo may also appear as plain `method:password`.

use rp_core::crypto::{is_aead_cipher, is_stream_cipher};
use rp_core::error::{ProbeError, Result};
use rp_core::options::SsOption;

use crate::base64util::{decode_any_str, encode_url};
use crate::{parse_host_port, parse_query};

pub fn parse_ss_link(link: &str) -> Result<SsOption> {
    let body = link
        .strip_prefix("ss://")
        .ok_or_else(|| ProbeError::bad_link("missing ss:// prefix"))?;

    let (body, remark) = split_fragment(body);

    let (body, query) = match body.split_once('?') {
        Some((b, q)) => (b, parse_query(q)),
        None => (body, Vec::new()),
    };
    let body = body.strip_suffix('/').unwrap_or(body);

    let (method, password, server, port) = if let Some(at) = body.rfind('@') {
        // SIP002: userinfo@host:port
        let userinfo = &body[..at];
        let (server, port) = parse_host_port(&body[at + 1..])?;
        let (method, password) = parse_userinfo(userinfo)?;
        (method, password, server, port)
    } else {
        // Legacy: the whole body is base64.
        let decoded = decode_any_str(body)?;
        let at = decoded
            .rfind('@')
            .ok_or_else(|| ProbeError::bad_link("legacy ss body missing @"))?;
        let (method, password) = split_method_password(&decoded[..at])?;
        let (server, port) = parse_host_port(&decoded[at + 1..])?;
        (method, password, server, port)
    };

    if !is_aead_cipher(&method) && !is_stream_cipher(&method) {
        return Err(ProbeError::bad_link(format!("unknown ss cipher {method}")));
    }

    let mut plugin = None;
    let mut plugin_opts = None;
    for (k, v) in query {
        if k == "plugin" {
            // SIP002 packs plugin name and options into one value.
            match v.split_once(';') {
                Some((name, opts)) => {
                    plugin = Some(name.to_string());
                    plugin_opts = Some(opts.to_string());
                }
                None => plugin = Some(v),
            }
        }
    }

    Ok(SsOption {
        server,
        port,
        password,
        cipher: method,
        plugin,
        plugin_opts,
        remark,
    })
}

/// Emits the SIP002 form with an unpadded URL-safe userinfo.
#[must_use]
pub fn encode_ss_link(option: &SsOption) -> String {
    let userinfo = encode_url(format!("{}:{}", option.cipher, option.password).as_bytes());
    let mut link = format!("ss://{}@{}:{}", userinfo, option.server, option.port);
    if let Some(plugin) = &option.plugin {
        let mut value = plugin.clone();
        if let Some(opts) = &option.plugin_opts {
            value.push(';');
            value.push_str(opts);
        }
        link.push_str("?plugin=");
        link.push_str(&urlencoding::encode(&value));
    }
    if let Some(remark) = &option.remark {
        link.push('#');
        link.push_str(&urlencoding::encode(remark));
    }
    link
}

fn split_fragment(body: &str) -> (&str, Option<String>) {
    match body.rfind('#') {
        Some(pos) => {
            let remark = urlencoding::decode(&body[pos + 1..])
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| body[pos + 1..].to_string());
            (&body[..pos], (!remark.is_empty()).then_some(remark))
        }
        None => (body, None),
    }
}

/// Userinfo is base64(method:password) or plain `method:password`.
fn parse_userinfo(userinfo: &str) -> Result<(String, String)> {
    if let Ok(decoded) = decode_any_str(userinfo) {
        if decoded.contains(':') {
            return split_method_password(&decoded);
        }
    }
    let decoded = urlencoding::decode(userinfo)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| userinfo.to_string());
    split_method_password(&decoded)
}

fn split_method_password(joined: &str) -> Result<(String, String)> {
    let (method, password) = joined
        .split_once(':')
        .ok_or_else(|| ProbeError::bad_link("ss userinfo missing method:password"))?;
    if method.is_empty() {
        return Err(ProbeError::bad_link("empty ss method"));
    }
    Ok((method.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use base64::Engine;

    #[test]
    fn parses_sip002() {
        let userinfo = STANDARD.encode("aes-128-gcm:password");
        let link = format!("ss://{userinfo}@server.example.com:8388#My%20Server");
        let opt = parse_ss_link(&link).unwrap();
        assert_eq!(opt.server, "server.example.com");
        assert_eq!(opt.port, 8388);
        assert_eq!(opt.cipher, "aes-128-gcm");
        assert_eq!(opt.password, "password");
        assert_eq!(opt.remark.as_deref(), Some("My Server"));
    }

    #[test]
    fn parses_sip002_unpadded_userinfo() {
        let userinfo = URL_SAFE_NO_PAD.encode("chacha20-ietf-poly1305:pw!");
        let link = format!("ss://{userinfo}@10.0.0.1:443");
        let opt = parse_ss_link(&link).unwrap();
        assert_eq!(opt.cipher, "chacha20-ietf-poly1305");
        assert_eq!(opt.password, "pw!");
        assert_eq!(opt.remark, None);
    }

    #[test]
    fn parses_legacy() {
        let body = STANDARD.encode("rc4-md5:secret@legacy.example.com:8389");
        let opt = parse_ss_link(&format!("ss://{body}#tag")).unwrap();
        assert_eq!(opt.cipher, "rc4-md5");
        assert_eq!(opt.password, "secret");
        assert_eq!(opt.server, "legacy.example.com");
        assert_eq!(opt.port, 8389);
        assert_eq!(opt.remark.as_deref(), Some("tag"));
    }

    #[test]
    fn parses_plugin_query() {
        let userinfo = URL_SAFE_NO_PAD.encode("aes-256-gcm:pw");
        let link =
            format!("ss://{userinfo}@h.example.com:443?plugin=obfs-local%3Bobfs%3Dhttp#x");
        let opt = parse_ss_link(&link).unwrap();
        assert_eq!(opt.plugin.as_deref(), Some("obfs-local"));
        assert_eq!(opt.plugin_opts.as_deref(), Some("obfs=http"));
    }

    #[test]
    fn rejects_unknown_cipher_and_bad_port() {
        let userinfo = STANDARD.encode("rot13:pw");
        assert!(parse_ss_link(&format!("ss://{userinfo}@h:8388")).is_err());
        let userinfo = STANDARD.encode("aes-128-gcm:pw");
        assert!(parse_ss_link(&format!("ss://{userinfo}@h:0")).is_err());
        assert!(parse_ss_link("ss://%%%").is_err());
    }

    #[test]
    fn roundtrip_modulo_padding() {
        let opt = SsOption {
            server: "server.example.com".into(),
            port: 8388,
            password: "pass:word".into(),
            cipher: "aes-256-gcm".into(),
            plugin: None,
            plugin_opts: None,
            remark: Some("edge".into()),
        };
        let back = parse_ss_link(&encode_ss_link(&opt)).unwrap();
        assert_eq!(back.server, opt.server);
        assert_eq!(back.port, opt.port);
        assert_eq!(back.password, opt.password);
        assert_eq!(back.cipher, opt.cipher);
        assert_eq!(back.remark, opt.remark);
    }
}
