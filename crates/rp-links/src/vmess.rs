//! `vmess://` links: the body is base64 (either alphabet, padding
//! optional) of a JSON object. Unknown keys are ignored; `scy` defaults
//! to `auto`; `port` and `aid` appear as strings or numbers depending
//! on which exporter produced the link.

use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use rp_core::error::{ProbeError, Result};
use rp_core::options::{VmessNetwork, VmessOption};

use crate::base64util::{decode_any, encode_std};

#[derive(Debug, Deserialize)]
struct VmessBody {
    #[serde(default)]
    #[allow(dead_code)]
    v: Option<StrOrNum>,
    #[serde(default)]
    ps: Option<String>,
    add: String,
    #[serde(deserialize_with = "de_port")]
    port: u16,
    id: String,
    #[serde(default, deserialize_with = "de_opt_u16")]
    aid: Option<u16>,
    #[serde(default)]
    net: Option<String>,
    #[serde(default, rename = "type")]
    #[allow(dead_code)]
    header_type: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    tls: Option<StrOrNum>,
    #[serde(default)]
    sni: Option<String>,
    #[serde(default)]
    scy: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StrOrNum {
    Str(String),
    Num(i64),
    Bool(bool),
}

fn de_port<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<u16, D::Error> {
    match StrOrNum::deserialize(de)? {
        StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
        StrOrNum::Num(n) => u16::try_from(n).map_err(serde::de::Error::custom),
        StrOrNum::Bool(_) => Err(serde::de::Error::custom("port cannot be a bool")),
    }
}

fn de_opt_u16<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<u16>, D::Error> {
    match Option::<StrOrNum>::deserialize(de)? {
        None => Ok(None),
        Some(StrOrNum::Str(s)) if s.is_empty() => Ok(None),
        Some(StrOrNum::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(StrOrNum::Num(n)) => u16::try_from(n).map(Some).map_err(serde::de::Error::custom),
        Some(StrOrNum::Bool(_)) => Err(serde::de::Error::custom("aid cannot be a bool")),
    }
}

pub fn parse_vmess_link(link: &str) -> Result<VmessOption> {
    let blob = link
        .strip_prefix("vmess://")
        .ok_or_else(|| ProbeError::bad_link("missing vmess:// prefix"))?;
    let json = decode_any(blob)?;
    let body: VmessBody = serde_json::from_slice(&json)
        .map_err(|e| ProbeError::bad_link(format!("vmess json: {e}")))?;

    if body.port == 0 {
        return Err(ProbeError::bad_link("port must be 1..=65535"));
    }
    Uuid::parse_str(&body.id).map_err(|e| ProbeError::bad_link(format!("vmess uuid: {e}")))?;

    let network = match &body.net {
        None => VmessNetwork::Tcp,
        Some(name) => VmessNetwork::from_name(name)
            .ok_or_else(|| ProbeError::bad_link(format!("unknown vmess net {name:?}")))?,
    };

    let tls = matches!(
        &body.tls,
        Some(StrOrNum::Str(s)) if s == "tls" || s == "1" || s == "true"
    ) || matches!(&body.tls, Some(StrOrNum::Bool(true)))
        || matches!(&body.tls, Some(StrOrNum::Num(1)));

    let security = match body.scy.as_deref() {
        None | Some("") => "auto".to_string(),
        Some(s) => s.to_string(),
    };
    if !matches!(security.as_str(), "auto" | "aes-128-gcm" | "chacha20-poly1305" | "none") {
        return Err(ProbeError::bad_link(format!("unknown vmess security {security:?}")));
    }

    Ok(VmessOption {
        server: body.add,
        port: body.port,
        uuid: body.id,
        alter_id: body.aid.unwrap_or(0),
        security,
        network,
        tls,
        ws_path: body.path.filter(|s| !s.is_empty()),
        ws_host: body.host.filter(|s| !s.is_empty()),
        server_name: body.sni.filter(|s| !s.is_empty()),
        aead: None,
        remark: body.ps.filter(|s| !s.is_empty()),
    })
}

#[must_use]
pub fn encode_vmess_link(option: &VmessOption) -> String {
    let body = serde_json::json!({
        "v": "2",
        "ps": option.remark.clone().unwrap_or_default(),
        "add": option.server,
        "port": option.port,
        "id": option.uuid,
        "aid": option.alter_id,
        "scy": option.security,
        "net": option.network.as_str(),
        "type": "none",
        "host": option.ws_host.clone().unwrap_or_default(),
        "path": option.ws_path.clone().unwrap_or_default(),
        "tls": if option.tls { "tls" } else { "" },
        "sni": option.server_name.clone().unwrap_or_default(),
    });
    format!("vmess://{}", encode_std(body.to_string().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use base64::Engine;

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    #[test]
    fn parses_numeric_and_string_fields() {
        let json = format!(
            r#"{{"v":"2","ps":"node","add":"relay.example.com","port":"443","id":"{UUID}","aid":"0","net":"ws","host":"cdn.example.com","path":"/ws","tls":"tls","unknown_key":1}}"#
        );
        let link = format!("vmess://{}", STANDARD.encode(&json));
        let opt = parse_vmess_link(&link).unwrap();
        assert_eq!(opt.server, "relay.example.com");
        assert_eq!(opt.port, 443);
        assert_eq!(opt.alter_id, 0);
        assert_eq!(opt.network, VmessNetwork::Ws);
        assert!(opt.tls);
        assert_eq!(opt.ws_path.as_deref(), Some("/ws"));
        assert_eq!(opt.security, "auto");
        assert_eq!(opt.remark.as_deref(), Some("node"));
    }

    #[test]
    fn parses_urlsafe_unpadded_body() {
        let json = format!(r#"{{"add":"h.example.org","port":8443,"id":"{UUID}","aid":4,"scy":"aes-128-gcm"}}"#);
        let link = format!("vmess://{}", URL_SAFE_NO_PAD.encode(&json));
        let opt = parse_vmess_link(&link).unwrap();
        assert_eq!(opt.port, 8443);
        assert_eq!(opt.alter_id, 4);
        assert_eq!(opt.security, "aes-128-gcm");
        assert_eq!(opt.network, VmessNetwork::Tcp);
        assert!(!opt.tls);
    }

    #[test]
    fn rejects_bad_uuid_and_port() {
        let json = r#"{"add":"h","port":443,"id":"not-a-uuid"}"#;
        assert!(parse_vmess_link(&format!("vmess://{}", STANDARD.encode(json))).is_err());
        let json = format!(r#"{{"add":"h","port":0,"id":"{UUID}"}}"#);
        assert!(parse_vmess_link(&format!("vmess://{}", STANDARD.encode(&json))).is_err());
        assert!(parse_vmess_link("vmess://*&^").is_err());
        let json = format!(r#"{{"add":"h","port":1,"id":"{UUID}","scy":"des"}}"#);
        assert!(parse_vmess_link(&format!("vmess://{}", STANDARD.encode(&json))).is_err());
    }

    #[test]
    fn roundtrip() {
        let json = format!(
            r#"{{"ps":"jp","add":"relay.example.com","port":443,"id":"{UUID}","aid":0,"net":"tcp","tls":"tls","sni":"front.example.com","scy":"chacha20-poly1305"}}"#
        );
        let opt = parse_vmess_link(&format!("vmess://{}", STANDARD.encode(&json))).unwrap();
        let back = parse_vmess_link(&encode_vmess_link(&opt)).unwrap();
        assert_eq!(back.server, opt.server);
        assert_eq!(back.port, opt.port);
        assert_eq!(back.uuid, opt.uuid);
        assert_eq!(back.alter_id, opt.alter_id);
        assert_eq!(back.security, opt.security);
        assert_eq!(back.tls, opt.tls);
        assert_eq!(back.server_name, opt.server_name);
        assert_eq!(back.remark, opt.remark);
    }
}
