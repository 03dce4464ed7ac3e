//! VMess outbound connector: legacy (alterID > 0) and AEAD request
//! headers over TCP, optionally inside TLS.

mod aead;
mod stream;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use aes::Aes128;
use async_trait::async_trait;
use cfb_mode::cipher::KeyIvInit;
use rand::Rng;
use sha2::Digest;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use rp_core::crypto::aead::AeadCipherKind;
use rp_core::crypto::hash::{hmac_md5, md5};
use rp_core::dns::{default_resolver, Resolver};
use rp_core::error::{ProbeError, Result};
use rp_core::options::{VmessNetwork, VmessOption};
use rp_core::session::Addr;
use rp_core::Metadata;
use rp_transport::{TlsClient, TlsClientConfig};

use crate::traits::{connect_server, map_dial_error, BoxedStream, DialOpts, OutboundConnector};
use stream::{RespMode, Security, VmessStream};

type Aes128CfbEnc = cfb_mode::BufEncryptor<Aes128>;
type Aes128CfbDec = cfb_mode::BufDecryptor<Aes128>;

/// Suffix mixed into the UUID when deriving the command key.
const CMD_KEY_MAGIC: &[u8] = b"c48619fe-8f02-49e0-b9e9-edf763e17e21";

const VERSION: u8 = 1;
const OPTION_CHUNK_STREAM: u8 = 0x01;
const COMMAND_TCP: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x02;
const ATYP_IPV6: u8 = 0x03;

/// VMess outbound connector.
pub struct VmessConnector {
    server: String,
    port: u16,
    uuid: Uuid,
    cmd_key: [u8; 16],
    security: Security,
    use_aead_header: bool,
    tls: Option<TlsClient>,
    resolver: Arc<dyn Resolver>,
}

impl std::fmt::Debug for VmessConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmessConnector")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("aead", &self.use_aead_header)
            .finish()
    }
}

impl VmessConnector {
    pub fn new(option: &VmessOption, resolver: Option<Arc<dyn Resolver>>) -> Result<Self> {
        if option.network != VmessNetwork::Tcp {
            return Err(ProbeError::UnsupportedConfig(format!(
                "vmess network {} is not dialable here",
                option.network.as_str()
            )));
        }
        let uuid = Uuid::parse_str(&option.uuid)
            .map_err(|e| ProbeError::UnsupportedConfig(format!("vmess uuid: {e}")))?;
        let security = Security::from_option(&option.security)?;

        let tls = if option.tls {
            let server_name = option
                .server_name
                .clone()
                .or_else(|| option.ws_host.clone())
                .unwrap_or_else(|| option.server.clone());
            Some(
                TlsClient::new(&TlsClientConfig {
                    server_name,
                    alpn: Vec::new(),
                    skip_verify: false,
                })
                .map_err(map_dial_error)?,
            )
        } else {
            None
        };

        Ok(Self {
            server: option.server.clone(),
            port: option.port,
            uuid,
            cmd_key: derive_cmd_key(&uuid),
            security,
            use_aead_header: option.use_aead_header(),
            tls,
            resolver: resolver.unwrap_or_else(default_resolver),
        })
    }
}

#[async_trait]
impl OutboundConnector for VmessConnector {
    fn name(&self) -> &'static str {
        "vmess"
    }

    async fn dial_context(&self, opts: &DialOpts, meta: &Metadata) -> Result<BoxedStream> {
        let _span = crate::outbound::span_dial("vmess", meta);
        let tcp = connect_server(&self.resolver, &self.server, self.port, opts).await?;

        // All randomness is drawn up front; the thread-local generator
        // must not live across an await point.
        let (body_key, body_iv, response_auth, padding_len, random, conn_nonce) = {
            let mut rng = rand::thread_rng();
            let mut body_key = [0u8; 16];
            let mut body_iv = [0u8; 16];
            let mut random = [0u8; 4];
            let mut conn_nonce = [0u8; 8];
            rng.fill(&mut body_key);
            rng.fill(&mut body_iv);
            rng.fill(&mut random);
            rng.fill(&mut conn_nonce);
            let response_auth: u8 = rng.gen();
            let padding_len: u8 = rng.gen_range(0..16);
            (body_key, body_iv, response_auth, padding_len, random, conn_nonce)
        };

        let handshake = async {
            let mut transport: BoxedStream = match &self.tls {
                Some(tls) => tls.handshake(Box::new(tcp)).await.map_err(map_dial_error)?,
                None => Box::new(tcp),
            };

            let header = build_plain_header(
                &body_key,
                &body_iv,
                response_auth,
                padding_len,
                self.security,
                meta,
            );

            let timestamp = unix_now();
            let (wire, resp_mode) = if self.use_aead_header {
                let wire =
                    seal_aead_request(&self.cmd_key, timestamp, random, conn_nonce, &header)?;

                let resp_key = truncate16(&sha2::Sha256::digest(body_key));
                let resp_iv = truncate16(&sha2::Sha256::digest(body_iv));
                let mode = RespMode::Aead {
                    len_key: aead::kdf16(&resp_key, &[aead::LABEL_RESP_LEN_KEY]),
                    len_nonce: aead::kdf12(&resp_iv, &[aead::LABEL_RESP_LEN_NONCE]),
                    header_key: aead::kdf16(&resp_key, &[aead::LABEL_RESP_KEY]),
                    header_nonce: aead::kdf12(&resp_iv, &[aead::LABEL_RESP_NONCE]),
                };
                (wire, (mode, resp_key, resp_iv))
            } else {
                let wire = seal_legacy_request(&self.uuid, &self.cmd_key, timestamp, &header);

                let resp_key = md5(&body_key);
                let resp_iv = md5(&body_iv);
                let dec = Aes128CfbDec::new_from_slices(&resp_key, &resp_iv)
                    .map_err(|_| ProbeError::internal("legacy response cipher init"))?;
                let mode = RespMode::Legacy { dec: Box::new(dec) };
                (wire, (mode, resp_key, resp_iv))
            };
            let (resp_mode, resp_key, resp_iv) = resp_mode;

            transport
                .write_all(&wire)
                .await
                .map_err(|e| ProbeError::HandshakeFail(format!("vmess header write: {e}")))?;
            transport
                .flush()
                .await
                .map_err(|e| ProbeError::HandshakeFail(format!("vmess header flush: {e}")))?;

            Ok::<BoxedStream, ProbeError>(Box::new(VmessStream::new(
                transport,
                self.security,
                body_key,
                body_iv,
                resp_key,
                resp_iv,
                response_auth,
                resp_mode,
            )))
        };

        let stream = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(ProbeError::Cancelled),
            out = tokio::time::timeout(opts.timeout, handshake) => out
                .map_err(|_| ProbeError::Timeout)??,
        };
        debug!(server = %self.server, aead = self.use_aead_header, "vmess tunnel ready");
        Ok(stream)
    }
}

fn derive_cmd_key(uuid: &Uuid) -> [u8; 16] {
    let mut seed = Vec::with_capacity(16 + CMD_KEY_MAGIC.len());
    seed.extend_from_slice(uuid.as_bytes());
    seed.extend_from_slice(CMD_KEY_MAGIC);
    md5(&seed)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn truncate16(digest: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// Plaintext request header, trailing FNV1a-32 included.
fn build_plain_header(
    body_key: &[u8; 16],
    body_iv: &[u8; 16],
    response_auth: u8,
    padding_len: u8,
    security: Security,
    meta: &Metadata,
) -> Vec<u8> {
    let mut header = Vec::with_capacity(64);
    header.push(VERSION);
    header.extend_from_slice(body_iv);
    header.extend_from_slice(body_key);
    header.push(response_auth);
    header.push(OPTION_CHUNK_STREAM);
    header.push((padding_len << 4) | security.wire_byte());
    header.push(0x00);
    header.push(COMMAND_TCP);
    header.extend_from_slice(&meta.port.to_be_bytes());
    match &meta.addr {
        Addr::V4(ip) => {
            header.push(ATYP_IPV4);
            header.extend_from_slice(&ip.octets());
        }
        Addr::V6(ip) => {
            header.push(ATYP_IPV6);
            header.extend_from_slice(&ip.octets());
        }
        Addr::Domain(domain) => {
            header.push(ATYP_DOMAIN);
            header.push(domain.len() as u8);
            header.extend_from_slice(domain.as_bytes());
        }
    }
    if padding_len > 0 {
        let mut padding = vec![0u8; padding_len as usize];
        rand::thread_rng().fill(&mut padding[..]);
        header.extend_from_slice(&padding);
    }
    let hash = fnv1a(&header);
    header.extend_from_slice(&hash.to_be_bytes());
    header
}

/// Legacy wire image: timed HMAC auth, then the CFB-encrypted header.
fn seal_legacy_request(uuid: &Uuid, cmd_key: &[u8; 16], timestamp: u64, header: &[u8]) -> Vec<u8> {
    let auth = hmac_md5(uuid.as_bytes(), &timestamp.to_be_bytes());

    let ts_bytes = timestamp.to_be_bytes();
    let mut iv_seed = Vec::with_capacity(32);
    for _ in 0..4 {
        iv_seed.extend_from_slice(&ts_bytes);
    }
    let header_iv = md5(&iv_seed);

    let mut encrypted = header.to_vec();
    let mut enc = Aes128CfbEnc::new_from_slices(cmd_key, &header_iv)
        .expect("cmd key and iv are 16 bytes");
    enc.encrypt(&mut encrypted);

    let mut wire = Vec::with_capacity(16 + encrypted.len());
    wire.extend_from_slice(&auth);
    wire.extend_from_slice(&encrypted);
    wire
}

/// AEAD wire image: sealed auth id, sealed length, connection nonce,
/// sealed header.
fn seal_aead_request(
    cmd_key: &[u8; 16],
    timestamp: u64,
    random: [u8; 4],
    conn_nonce: [u8; 8],
    header: &[u8],
) -> Result<Vec<u8>> {
    let auth_id = aead::seal_auth_id(cmd_key, timestamp, random)?;

    let len_key = aead::kdf16(cmd_key, &[aead::LABEL_LENGTH_KEY, &auth_id, &conn_nonce]);
    let len_nonce = aead::kdf12(cmd_key, &[aead::LABEL_LENGTH_NONCE, &auth_id, &conn_nonce]);
    let header_len = (header.len() as u16).to_be_bytes();
    let sealed_len = AeadCipherKind::Aes128Gcm.seal_with_aad(&len_key, &len_nonce, &header_len, &auth_id)?;

    let header_key = aead::kdf16(cmd_key, &[aead::LABEL_HEADER_KEY, &auth_id, &conn_nonce]);
    let header_nonce = aead::kdf12(cmd_key, &[aead::LABEL_HEADER_NONCE, &auth_id, &conn_nonce]);
    let sealed_header =
        AeadCipherKind::Aes128Gcm.seal_with_aad(&header_key, &header_nonce, header, &auth_id)?;

    let mut wire =
        Vec::with_capacity(16 + sealed_len.len() + conn_nonce.len() + sealed_header.len());
    wire.extend_from_slice(&auth_id);
    wire.extend_from_slice(&sealed_len);
    wire.extend_from_slice(&conn_nonce);
    wire.extend_from_slice(&sealed_header);
    Ok(wire)
}

/// FNV1a-32, the header checksum on the deployed VMess wire.
fn fnv1a(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    fn option() -> VmessOption {
        VmessOption {
            server: "127.0.0.1".into(),
            port: 10086,
            uuid: UUID.into(),
            alter_id: 0,
            security: "auto".into(),
            network: VmessNetwork::Tcp,
            tls: false,
            ws_path: None,
            ws_host: None,
            server_name: None,
            aead: None,
            remark: None,
        }
    }

    #[test]
    fn fnv1a_known_vector() {
        // FNV-1a("a") = 0xe40c292c
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
    }

    #[test]
    fn cmd_key_is_stable() {
        let uuid = Uuid::parse_str(UUID).unwrap();
        assert_eq!(derive_cmd_key(&uuid), derive_cmd_key(&uuid));
        let other = Uuid::parse_str("00000000-0000-0000-0000-000000000000").unwrap();
        assert_ne!(derive_cmd_key(&uuid), derive_cmd_key(&other));
    }

    #[test]
    fn header_layout() {
        let meta = Metadata::tcp("clients3.google.com", 80);
        let key = [1u8; 16];
        let iv = [2u8; 16];
        let header = build_plain_header(&key, &iv, 0xAB, 0, Security::Aes128Gcm, &meta);
        assert_eq!(header[0], VERSION);
        assert_eq!(&header[1..17], &iv);
        assert_eq!(&header[17..33], &key);
        assert_eq!(header[33], 0xAB);
        assert_eq!(header[34], OPTION_CHUNK_STREAM);
        assert_eq!(header[35], 0x03);
        assert_eq!(header[36], 0x00);
        assert_eq!(header[37], COMMAND_TCP);
        assert_eq!(&header[38..40], &80u16.to_be_bytes());
        assert_eq!(header[40], ATYP_DOMAIN);
        assert_eq!(header[41] as usize, "clients3.google.com".len());
        // FNV1a over everything before the trailer.
        let trailer = u32::from_be_bytes(header[header.len() - 4..].try_into().unwrap());
        assert_eq!(trailer, fnv1a(&header[..header.len() - 4]));
    }

    #[test]
    fn legacy_request_auth_prefix() {
        let uuid = Uuid::parse_str(UUID).unwrap();
        let cmd_key = derive_cmd_key(&uuid);
        let wire = seal_legacy_request(&uuid, &cmd_key, 1_700_000_000, b"header-bytes");
        assert_eq!(wire.len(), 16 + 12);
        assert_eq!(
            &wire[..16],
            &hmac_md5(uuid.as_bytes(), &1_700_000_000u64.to_be_bytes())
        );
        // Encrypted tail must differ from the plaintext header.
        assert_ne!(&wire[16..], b"header-bytes");
    }

    #[test]
    fn aead_request_shape() {
        let uuid = Uuid::parse_str(UUID).unwrap();
        let cmd_key = derive_cmd_key(&uuid);
        let header = vec![0x42u8; 50];
        let wire =
            seal_aead_request(&cmd_key, 1_700_000_000, [1, 2, 3, 4], [9; 8], &header).unwrap();
        // auth id + (2+16) sealed length + 8 nonce + (50+16) sealed header
        assert_eq!(wire.len(), 16 + 18 + 8 + 66);
    }

    #[test]
    fn connector_rejects_non_tcp_networks() {
        let mut opt = option();
        opt.network = VmessNetwork::Ws;
        let err = VmessConnector::new(&opt, None).unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedConfig(_)));
    }

    #[test]
    fn connector_rejects_bad_uuid() {
        let mut opt = option();
        opt.uuid = "not-a-uuid".into();
        assert!(VmessConnector::new(&opt, None).is_err());
    }

    #[test]
    fn aead_header_rule_follows_alter_id() {
        let c = VmessConnector::new(&option(), None).unwrap();
        assert!(c.use_aead_header);
        let mut opt = option();
        opt.alter_id = 8;
        let c = VmessConnector::new(&opt, None).unwrap();
        assert!(!c.use_aead_header);
    }
}
