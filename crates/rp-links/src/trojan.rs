//! `trojan://password@host:port?sni=…&allowInsecure=…&alpn=…#remark`.
//! The password is percent-decoded; `peer` is accepted as an alias for
//! `sni` (both circulate).

use rp_core::error::{ProbeError, Result};
use rp_core::options::TrojanOption;

use crate::{parse_host_port, parse_query};

pub fn parse_trojan_link(link: &str) -> Result<TrojanOption> {
    let body = link
        .strip_prefix("trojan://")
        .ok_or_else(|| ProbeError::bad_link("missing trojan:// prefix"))?;

    let (body, remark) = match body.rfind('#') {
        Some(pos) => {
            let remark = urlencoding::decode(&body[pos + 1..])
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| body[pos + 1..].to_string());
            (&body[..pos], (!remark.is_empty()).then_some(remark))
        }
        None => (body, None),
    };

    let (body, query) = match body.split_once('?') {
        Some((b, q)) => (b, parse_query(q)),
        None => (body, Vec::new()),
    };
    let body = body.strip_suffix('/').unwrap_or(body);

    let at = body
        .rfind('@')
        .ok_or_else(|| ProbeError::bad_link("trojan link missing password"))?;
    let password = urlencoding::decode(&body[..at])
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| body[..at].to_string());
    if password.is_empty() {
        return Err(ProbeError::bad_link("empty trojan password"));
    }
    let (server, port) = parse_host_port(&body[at + 1..])?;

    let mut option = TrojanOption {
        server,
        port,
        password,
        sni: None,
        alpn: Vec::new(),
        skip_cert_verify: false,
        remark,
    };

    for (key, value) in query {
        match key.as_str() {
            "sni" | "peer" => {
                if !value.is_empty() {
                    option.sni = Some(value);
                }
            }
            "allowInsecure" | "allow_insecure" => {
                option.skip_cert_verify = matches!(value.as_str(), "1" | "true");
            }
            "alpn" => {
                option.alpn = value
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    Ok(option)
}

#[must_use]
pub fn encode_trojan_link(option: &TrojanOption) -> String {
    let mut link = format!(
        "trojan://{}@{}:{}",
        urlencoding::encode(&option.password),
        option.server,
        option.port
    );
    let mut params = Vec::new();
    if let Some(sni) = &option.sni {
        params.push(format!("sni={}", urlencoding::encode(sni)));
    }
    if option.skip_cert_verify {
        params.push("allowInsecure=1".to_string());
    }
    if !option.alpn.is_empty() {
        params.push(format!("alpn={}", urlencoding::encode(&option.alpn.join(","))));
    }
    if !params.is_empty() {
        link.push('?');
        link.push_str(&params.join("&"));
    }
    if let Some(remark) = &option.remark {
        link.push('#');
        link.push_str(&urlencoding::encode(remark));
    }
    link
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_link() {
        let opt = parse_trojan_link(
            "trojan://p%40ss@relay.example.com:443?sni=front.example.com&allowInsecure=1&alpn=h2%2Chttp%2F1.1#HK",
        )
        .unwrap();
        assert_eq!(opt.password, "p@ss");
        assert_eq!(opt.server, "relay.example.com");
        assert_eq!(opt.port, 443);
        assert_eq!(opt.sni.as_deref(), Some("front.example.com"));
        assert!(opt.skip_cert_verify);
        assert_eq!(opt.alpn, vec!["h2".to_string(), "http/1.1".to_string()]);
        assert_eq!(opt.remark.as_deref(), Some("HK"));
    }

    #[test]
    fn peer_is_an_sni_alias() {
        let opt = parse_trojan_link("trojan://pw@h.example.com:443?peer=sni.example.com").unwrap();
        assert_eq!(opt.sni.as_deref(), Some("sni.example.com"));
        assert!(!opt.skip_cert_verify);
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(parse_trojan_link("trojan://h.example.com:443").is_err());
        assert!(parse_trojan_link("trojan://@h.example.com:443").is_err());
        assert!(parse_trojan_link("trojan://pw@h.example.com").is_err());
        assert!(parse_trojan_link("trojan://pw@h.example.com:0").is_err());
    }

    #[test]
    fn roundtrip() {
        let opt = TrojanOption {
            server: "relay.example.com".into(),
            port: 443,
            password: "pässwörd/with:stuff".into(),
            sni: Some("front.example.com".into()),
            alpn: vec!["h2".into()],
            skip_cert_verify: true,
            remark: Some("node 7".into()),
        };
        let back = parse_trojan_link(&encode_trojan_link(&opt)).unwrap();
        assert_eq!(back.password, opt.password);
        assert_eq!(back.server, opt.server);
        assert_eq!(back.port, opt.port);
        assert_eq!(back.sni, opt.sni);
        assert_eq!(back.alpn, opt.alpn);
        assert_eq!(back.skip_cert_verify, opt.skip_cert_verify);
        assert_eq!(back.remark, opt.remark);
    }
}
