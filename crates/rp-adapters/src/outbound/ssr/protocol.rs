//! ShadowsocksR protocol plugins.
//!
//! A protocol plugin wraps the user payload before the stream cipher:
//! `origin` passes bytes through, the `auth_aes128_*` pair adds a
//! one-time auth block plus per-packet truncated HMACs, and
//! `auth_chain_a` additionally re-encrypts every chunk with RC4 keyed
//! from the rolling packet hashes and sizes its padding with a seeded
//! xorshift128+ generator.

use rand::{Rng, RngCore};

use rp_core::crypto::hash::{hmac_md5, hmac_sha1};
use rp_core::crypto::kdf::derive_key;
use rp_core::error::{ProbeError, Result};

use super::ServerInfo;

/// Capability every protocol plugin exposes.
pub(crate) trait SsrProtocol: Send {
    fn set_server_info(&mut self, info: &ServerInfo);

    /// Wraps outgoing plaintext; called with whole user writes.
    fn pre_encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Unwraps incoming plaintext; buffers partial packets internally.
    fn post_decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Per-packet overhead advertised in auth handshakes.
    fn overhead(&self) -> u16;

    fn name(&self) -> &'static str;
}

/// Resolves a protocol name once, at dial time.
pub(crate) fn make_protocol(name: &str) -> Result<Box<dyn SsrProtocol>> {
    match name {
        "origin" => Ok(Box::new(Origin)),
        "auth_aes128_md5" => Ok(Box::new(AuthAes128::new(AuthHash::Md5))),
        "auth_aes128_sha1" => Ok(Box::new(AuthAes128::new(AuthHash::Sha1))),
        "auth_chain_a" => Ok(Box::new(AuthChainA::new())),
        other => Err(ProbeError::UnsupportedConfig(format!(
            "unknown ssr protocol {other}"
        ))),
    }
}

/// Head size of the first payload: the leading address atom when one is
/// recognizable, a conservative default otherwise.
pub(crate) fn head_size(buf: &[u8], default: usize) -> usize {
    if buf.len() < 2 {
        return default;
    }
    match buf[0] & 0x07 {
        0x01 => 7,
        0x04 => 19,
        0x03 => 4 + buf[1] as usize,
        _ => default,
    }
}

/// AES-128 of a single block with an all-zero CBC IV, which collapses
/// to one ECB block.
fn encrypt_auth_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};
    let cipher = aes::Aes128::new_from_slice(key).expect("auth block key is 16 bytes");
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut ga);
    ga.into()
}

fn base64_std(data: &[u8]) -> String {
    // Standard alphabet with padding, as the auth key derivation expects.
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        out.push(TABLE[(b[0] >> 2) as usize] as char);
        out.push(TABLE[(((b[0] & 0x03) << 4) | (b[1] >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            TABLE[(((b[1] & 0x0f) << 2) | (b[2] >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            TABLE[(b[2] & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

// === origin ===

struct Origin;

impl SsrProtocol for Origin {
    fn set_server_info(&mut self, _info: &ServerInfo) {}

    fn pre_encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn post_decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn overhead(&self) -> u16 {
        0
    }

    fn name(&self) -> &'static str {
        "origin"
    }
}

// === auth_aes128_md5 / auth_aes128_sha1 ===

#[derive(Clone, Copy)]
enum AuthHash {
    Md5,
    Sha1,
}

impl AuthHash {
    fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            AuthHash::Md5 => hmac_md5(key, data).to_vec(),
            AuthHash::Sha1 => hmac_sha1(key, data).to_vec(),
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            AuthHash::Md5 => rp_core::crypto::hash::md5(data).to_vec(),
            AuthHash::Sha1 => {
                use sha1::{Digest, Sha1};
                let mut h = Sha1::new();
                h.update(data);
                h.finalize().to_vec()
            }
        }
    }

    fn salt(&self) -> &'static str {
        match self {
            AuthHash::Md5 => "auth_aes128_md5",
            AuthHash::Sha1 => "auth_aes128_sha1",
        }
    }
}

const AUTH_AES128_UNIT: usize = 8100;

struct AuthAes128 {
    hash: AuthHash,
    user_key: Vec<u8>,
    user_id: [u8; 4],
    client_id: [u8; 4],
    connection_id: u32,
    mac_seed: Vec<u8>,
    head_default: usize,
    pack_id: u32,
    recv_id: u32,
    has_sent_header: bool,
    recv_buf: Vec<u8>,
}

impl AuthAes128 {
    fn new(hash: AuthHash) -> Self {
        let mut rng = rand::thread_rng();
        let mut client_id = [0u8; 4];
        rng.fill_bytes(&mut client_id);
        Self {
            hash,
            user_key: Vec::new(),
            user_id: rng.gen(),
            client_id,
            connection_id: rng.gen::<u32>() & 0x00FF_FFFF,
            mac_seed: Vec::new(),
            head_default: 30,
            pack_id: 1,
            recv_id: 1,
            has_sent_header: false,
            recv_buf: Vec::new(),
        }
    }

    fn rnd_padding(&self, payload_len: usize) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        if payload_len > 1200 {
            return vec![0x01];
        }
        let rand_len = if self.pack_id > 4 {
            rng.gen::<u8>() as usize % 32
        } else if payload_len > 900 {
            rng.gen::<u8>() as usize % 128
        } else {
            rng.gen::<u16>() as usize % 512
        };
        let mut padding = vec![0u8; rand_len];
        rng.fill_bytes(&mut padding);
        if rand_len < 128 {
            let mut out = Vec::with_capacity(rand_len + 1);
            out.push(rand_len as u8 + 1);
            out.extend_from_slice(&padding);
            out
        } else {
            let mut out = Vec::with_capacity(rand_len + 3);
            out.push(0xFF);
            out.extend_from_slice(&(rand_len as u16 + 3).to_le_bytes());
            out.extend_from_slice(&padding);
            out
        }
    }

    /// First packet: 7-byte check head, 24-byte auth block, random
    /// padding, the head payload, 4-byte trailing HMAC.
    fn pack_auth_data(&mut self, buf: &[u8]) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let rand_len = if buf.len() > 400 {
            rng.gen::<u8>() as usize % 512
        } else {
            rng.gen::<u16>() as usize % 1024
        };

        let utc = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;

        let data_len = 7 + 24 + rand_len + buf.len() + 4;
        let mut plain = [0u8; 16];
        plain[..4].copy_from_slice(&utc.to_le_bytes());
        plain[4..8].copy_from_slice(&self.client_id);
        plain[8..12].copy_from_slice(&self.connection_id.to_le_bytes());
        plain[12..14].copy_from_slice(&(data_len as u16).to_le_bytes());
        plain[14..16].copy_from_slice(&(rand_len as u16).to_le_bytes());

        let enc_password = format!("{}{}", base64_std(&self.user_key), self.hash.salt());
        let enc_key: [u8; 16] = derive_key(&enc_password, 16).try_into().expect("16-byte key");
        let encrypted = encrypt_auth_block(&enc_key, &plain);

        let mut check_head = vec![0u8; 1];
        rng.fill_bytes(&mut check_head);
        let head_mac = self.hash.hmac(&self.mac_seed, &check_head);
        check_head.extend_from_slice(&head_mac[..6]);

        let mut auth = Vec::with_capacity(24);
        auth.extend_from_slice(&self.user_id);
        auth.extend_from_slice(&encrypted);
        let auth_mac = self.hash.hmac(&self.mac_seed, &auth);
        auth.extend_from_slice(&auth_mac[..4]);

        let mut out = Vec::with_capacity(data_len);
        out.extend_from_slice(&check_head);
        out.extend_from_slice(&auth);
        let mut padding = vec![0u8; rand_len];
        rng.fill_bytes(&mut padding);
        out.extend_from_slice(&padding);
        out.extend_from_slice(buf);
        let tail = self.hash.hmac(&self.user_key, &out);
        out.extend_from_slice(&tail[..4]);
        out
    }

    /// Steady-state packet:
    /// `len(2,LE) ‖ HMAC(len)[..2] ‖ padding ‖ payload ‖ HMAC(all)[..4]`
    /// keyed with `user_key ‖ pack_id(LE)`.
    fn pack_data(&mut self, buf: &[u8]) -> Vec<u8> {
        let padding = self.rnd_padding(buf.len());
        let data_len = padding.len() + buf.len() + 8;

        let mut mac_key = self.user_key.clone();
        mac_key.extend_from_slice(&self.pack_id.to_le_bytes());

        let mut out = Vec::with_capacity(data_len);
        out.extend_from_slice(&(data_len as u16).to_le_bytes());
        let len_mac = self.hash.hmac(&mac_key, &out[..2]);
        out.extend_from_slice(&len_mac[..2]);
        out.extend_from_slice(&padding);
        out.extend_from_slice(buf);
        let tail = self.hash.hmac(&mac_key, &out);
        out.extend_from_slice(&tail[..4]);

        self.pack_id = self.pack_id.wrapping_add(1);
        out
    }
}

impl SsrProtocol for AuthAes128 {
    fn set_server_info(&mut self, info: &ServerInfo) {
        self.user_key.clear();
        if let Some(param) = &info.param {
            if let Some((uid, key)) = param.split_once(':') {
                if let Ok(uid) = uid.trim().parse::<u32>() {
                    self.user_id = uid.to_le_bytes();
                    self.user_key = self.hash.digest(key.as_bytes());
                }
            }
        }
        if self.user_key.is_empty() {
            self.user_key = info.key.clone();
        }
        self.mac_seed = [info.iv.as_slice(), info.key.as_slice()].concat();
        self.head_default = info.head_size;
    }

    fn pre_encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() + 128);
        let mut rest = data;
        if !self.has_sent_header {
            let head = head_size(rest, self.head_default);
            let take = rest
                .len()
                .min(head + rand::thread_rng().gen_range(0..32));
            out.extend_from_slice(&self.pack_auth_data(&rest[..take]));
            rest = &rest[take..];
            self.has_sent_header = true;
        }
        for chunk in rest.chunks(AUTH_AES128_UNIT) {
            out.extend_from_slice(&self.pack_data(chunk));
        }
        Ok(out)
    }

    fn post_decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.recv_buf.extend_from_slice(data);
        let mut out = Vec::new();
        while self.recv_buf.len() > 4 {
            let mut mac_key = self.user_key.clone();
            mac_key.extend_from_slice(&self.recv_id.to_le_bytes());

            let len_mac = self.hash.hmac(&mac_key, &self.recv_buf[..2]);
            if len_mac[..2] != self.recv_buf[2..4] {
                return Err(ProbeError::crypto("ssr auth packet length hmac mismatch"));
            }
            let length = u16::from_le_bytes([self.recv_buf[0], self.recv_buf[1]]) as usize;
            if !(8..=8192).contains(&length) {
                return Err(ProbeError::crypto("ssr auth packet length out of range"));
            }
            if length > self.recv_buf.len() {
                break;
            }
            let tail = self.hash.hmac(&mac_key, &self.recv_buf[..length - 4]);
            if tail[..4] != self.recv_buf[length - 4..length] {
                return Err(ProbeError::crypto("ssr auth packet checksum mismatch"));
            }

            let pos = if self.recv_buf[4] < 0xFF {
                self.recv_buf[4] as usize + 4
            } else {
                u16::from_le_bytes([self.recv_buf[5], self.recv_buf[6]]) as usize + 4
            };
            if pos > length - 4 {
                return Err(ProbeError::crypto("ssr auth padding exceeds packet"));
            }
            out.extend_from_slice(&self.recv_buf[pos..length - 4]);
            self.recv_buf.drain(..length);
            self.recv_id = self.recv_id.wrapping_add(1);
        }
        Ok(out)
    }

    fn overhead(&self) -> u16 {
        9
    }

    fn name(&self) -> &'static str {
        match self.hash {
            AuthHash::Md5 => "auth_aes128_md5",
            AuthHash::Sha1 => "auth_aes128_sha1",
        }
    }
}

// === auth_chain_a ===

/// xorshift128+ generator seeded from packet hashes; sizes the random
/// padding on both directions identically.
struct XorShift128Plus {
    v0: u64,
    v1: u64,
}

impl XorShift128Plus {
    fn new() -> Self {
        Self { v0: 0, v1: 0 }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.v0;
        let y = self.v1;
        self.v0 = y;
        x ^= x << 23;
        x ^= y ^ (x >> 17) ^ (y >> 26);
        self.v1 = x;
        x.wrapping_add(y)
    }

    /// Seeds from a 16-byte hash with the packet length spliced into
    /// the first two bytes, then discards four outputs.
    fn init_from_bin_len(&mut self, bin: &[u8], length: u16) {
        let mut buf = [0u8; 16];
        let n = bin.len().min(16);
        buf[..n].copy_from_slice(&bin[..n]);
        buf[..2].copy_from_slice(&length.to_le_bytes());
        self.v0 = u64::from_le_bytes(buf[..8].try_into().expect("8 bytes"));
        self.v1 = u64::from_le_bytes(buf[8..].try_into().expect("8 bytes"));
        for _ in 0..4 {
            self.next();
        }
    }
}

/// Keystream RC4 over arbitrary-length keys; the chain keys are base64
/// concatenations whose length depends on the configured user key, so
/// the fixed-key-size cipher type does not apply here.
struct Rc4State {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4State {
    fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (idx, slot) in s.iter_mut().enumerate() {
            *slot = idx as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j
                .wrapping_add(s[i])
                .wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Self { s, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s
                [(self.s[self.i as usize].wrapping_add(self.s[self.j as usize])) as usize];
            *byte ^= k;
        }
    }
}

const AUTH_CHAIN_UNIT: usize = 2800;

struct AuthChainA {
    user_key: Vec<u8>,
    user_id: [u8; 4],
    client_id: [u8; 4],
    connection_id: u32,
    mac_seed: Vec<u8>,
    head_default: usize,
    overhead: u16,
    last_client_hash: [u8; 16],
    last_server_hash: [u8; 16],
    random_client: XorShift128Plus,
    random_server: XorShift128Plus,
    enc: Option<Rc4State>,
    dec: Option<Rc4State>,
    pack_id: u32,
    recv_id: u32,
    has_sent_header: bool,
    recv_buf: Vec<u8>,
}

impl AuthChainA {
    fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut client_id = [0u8; 4];
        rng.fill_bytes(&mut client_id);
        Self {
            user_key: Vec::new(),
            user_id: rng.gen(),
            client_id,
            connection_id: rng.gen::<u32>() & 0x00FF_FFFF,
            mac_seed: Vec::new(),
            head_default: 30,
            overhead: 4,
            last_client_hash: [0u8; 16],
            last_server_hash: [0u8; 16],
            random_client: XorShift128Plus::new(),
            random_server: XorShift128Plus::new(),
            enc: None,
            dec: None,
            pack_id: 1,
            recv_id: 1,
            has_sent_header: false,
            recv_buf: Vec::new(),
        }
    }

    fn rnd_data_len(payload_len: usize, last_hash: &[u8; 16], random: &mut XorShift128Plus) -> usize {
        if payload_len > 1440 {
            return 0;
        }
        random.init_from_bin_len(last_hash, payload_len as u16);
        let modulo = if payload_len > 1300 {
            31
        } else if payload_len > 900 {
            127
        } else if payload_len > 400 {
            521
        } else {
            1021
        };
        (random.next() % modulo) as usize
    }

    fn rnd_start_pos(rand_len: usize, random: &mut XorShift128Plus) -> usize {
        if rand_len == 0 {
            0
        } else {
            (random.next() % 8_589_934_609 % rand_len as u64) as usize
        }
    }

    /// First packet: 12-byte check head, 20-byte auth block, 4-byte
    /// HMAC; chains the RC4 data keys off the two packet hashes.
    fn pack_auth_data(&mut self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let utc = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;

        let mut plain = [0u8; 16];
        plain[..4].copy_from_slice(&utc.to_le_bytes());
        plain[4..8].copy_from_slice(&self.client_id);
        plain[8..12].copy_from_slice(&self.connection_id.to_le_bytes());
        plain[12..14].copy_from_slice(&self.overhead.to_le_bytes());
        plain[14..16].copy_from_slice(&0u16.to_le_bytes());

        let mut check_head = vec![0u8; 4];
        rng.fill_bytes(&mut check_head);
        self.last_client_hash = hmac_md5(&self.mac_seed, &check_head);
        check_head.extend_from_slice(&self.last_client_hash[..8]);

        let uid = u32::from_le_bytes(self.user_id)
            ^ u32::from_le_bytes(self.last_client_hash[8..12].try_into().expect("4 bytes"));

        let enc_password = format!("{}auth_chain_a", base64_std(&self.user_key));
        let enc_key: [u8; 16] = derive_key(&enc_password, 16).try_into().expect("16-byte key");
        let encrypted = encrypt_auth_block(&enc_key, &plain);

        let mut auth = Vec::with_capacity(20);
        auth.extend_from_slice(&uid.to_le_bytes());
        auth.extend_from_slice(&encrypted);
        self.last_server_hash = hmac_md5(&self.user_key, &auth);

        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&check_head);
        out.extend_from_slice(&auth);
        out.extend_from_slice(&self.last_server_hash[..4]);

        let enc_seed = format!(
            "{}{}",
            base64_std(&self.user_key),
            base64_std(&self.last_client_hash)
        );
        let dec_seed = format!(
            "{}{}",
            base64_std(&self.user_key),
            base64_std(&self.last_server_hash)
        );
        self.enc = Some(Rc4State::new(enc_seed.as_bytes()));
        self.dec = Some(Rc4State::new(dec_seed.as_bytes()));
        out
    }

    /// Steady-state packet: masked length, padding interleaved at a
    /// seeded offset, RC4-encrypted payload, rolling 2-byte HMAC tail.
    fn pack_client_data(&mut self, buf: &[u8]) -> Result<Vec<u8>> {
        let mut encrypted = buf.to_vec();
        self.enc
            .as_mut()
            .ok_or_else(|| ProbeError::internal("auth_chain data before auth packet"))?
            .apply(&mut encrypted);

        let rand_len =
            Self::rnd_data_len(buf.len(), &self.last_client_hash, &mut self.random_client);
        let mut padding = vec![0u8; rand_len];
        rand::thread_rng().fill_bytes(&mut padding);
        let start = Self::rnd_start_pos(rand_len, &mut self.random_client);

        let mask =
            u16::from_le_bytes(self.last_client_hash[14..16].try_into().expect("2 bytes"));
        let masked_len = (buf.len() as u16) ^ mask;

        let mut out = Vec::with_capacity(buf.len() + rand_len + 4);
        out.extend_from_slice(&masked_len.to_le_bytes());
        out.extend_from_slice(&padding[..start]);
        out.extend_from_slice(&encrypted);
        out.extend_from_slice(&padding[start..]);

        let mut mac_key = self.user_key.clone();
        mac_key.extend_from_slice(&self.pack_id.to_le_bytes());
        self.last_client_hash = hmac_md5(&mac_key, &out);
        out.extend_from_slice(&self.last_client_hash[..2]);
        self.pack_id = self.pack_id.wrapping_add(1);
        Ok(out)
    }
}

impl SsrProtocol for AuthChainA {
    fn set_server_info(&mut self, info: &ServerInfo) {
        self.user_key.clear();
        if let Some(param) = &info.param {
            if let Some((uid, key)) = param.split_once(':') {
                if let Ok(uid) = uid.trim().parse::<u32>() {
                    self.user_id = uid.to_le_bytes();
                    self.user_key = key.as_bytes().to_vec();
                }
            }
        }
        if self.user_key.is_empty() {
            self.user_key = info.key.clone();
        }
        self.mac_seed = [info.iv.as_slice(), info.key.as_slice()].concat();
        self.head_default = info.head_size;
        self.overhead = info.overhead;
    }

    fn pre_encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() + 128);
        let mut rest = data;
        if !self.has_sent_header {
            out.extend_from_slice(&self.pack_auth_data());
            let head = head_size(rest, self.head_default);
            let take = rest
                .len()
                .min(head + rand::thread_rng().gen_range(0..32));
            out.extend_from_slice(&self.pack_client_data(&rest[..take])?);
            rest = &rest[take..];
            self.has_sent_header = true;
        }
        for chunk in rest.chunks(AUTH_CHAIN_UNIT) {
            out.extend_from_slice(&self.pack_client_data(chunk)?);
        }
        Ok(out)
    }

    fn post_decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.recv_buf.extend_from_slice(data);
        let mut out = Vec::new();
        while self.recv_buf.len() >= 4 {
            let mask =
                u16::from_le_bytes(self.last_server_hash[14..16].try_into().expect("2 bytes"));
            let data_len = (u16::from_le_bytes([self.recv_buf[0], self.recv_buf[1]]) ^ mask)
                as usize;
            let rand_len =
                Self::rnd_data_len(data_len, &self.last_server_hash, &mut self.random_server);
            let length = data_len + rand_len;
            if length >= 4096 {
                return Err(ProbeError::crypto("auth_chain packet length out of range"));
            }
            if length + 4 > self.recv_buf.len() {
                break;
            }

            let mut mac_key = self.user_key.clone();
            mac_key.extend_from_slice(&self.recv_id.to_le_bytes());
            let hash = hmac_md5(&mac_key, &self.recv_buf[..length + 2]);
            if hash[..2] != self.recv_buf[length + 2..length + 4] {
                return Err(ProbeError::crypto("auth_chain packet checksum mismatch"));
            }

            let pos = if rand_len > 0 {
                2 + Self::rnd_start_pos(rand_len, &mut self.random_server)
            } else {
                2
            };
            let mut payload = self.recv_buf[pos..pos + data_len].to_vec();
            self.dec
                .as_mut()
                .ok_or_else(|| ProbeError::internal("auth_chain data before auth packet"))?
                .apply(&mut payload);

            if self.recv_id == 1 && payload.len() >= 2 {
                // First server packet leads with its TCP MSS.
                payload.drain(..2);
            }
            out.extend_from_slice(&payload);
            self.last_server_hash = hash;
            self.recv_id = self.recv_id.wrapping_add(1);
            self.recv_buf.drain(..length + 4);
        }
        Ok(out)
    }

    fn overhead(&self) -> u16 {
        4
    }

    fn name(&self) -> &'static str {
        "auth_chain_a"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(param: Option<&str>) -> ServerInfo {
        ServerInfo {
            host: "relay.example.com".into(),
            port: 8388,
            param: param.map(str::to_string),
            iv: vec![0x42; 16],
            key: vec![0x24; 16],
            head_size: 30,
            tcp_mss: 1460,
            overhead: 4,
        }
    }

    #[test]
    fn factory_resolves_known_names() {
        for name in ["origin", "auth_aes128_md5", "auth_aes128_sha1", "auth_chain_a"] {
            assert_eq!(make_protocol(name).unwrap().name(), name);
        }
        assert!(make_protocol("auth_sha1_v4").is_err());
    }

    #[test]
    fn head_size_reads_address_atoms() {
        assert_eq!(head_size(&[0x01, 0, 0, 0, 0, 0, 80], 30), 7);
        assert_eq!(head_size(&[0x04; 20], 30), 19);
        assert_eq!(head_size(&[0x03, 11, b'e'], 30), 15);
        assert_eq!(head_size(&[0x07, 0], 30), 30);
        assert_eq!(head_size(&[], 30), 30);
    }

    #[test]
    fn base64_matches_standard_alphabet() {
        assert_eq!(base64_std(b""), "");
        assert_eq!(base64_std(b"f"), "Zg==");
        assert_eq!(base64_std(b"fo"), "Zm8=");
        assert_eq!(base64_std(b"foo"), "Zm9v");
        assert_eq!(base64_std(b"foob"), "Zm9vYg==");
    }

    #[test]
    fn auth_aes128_first_packet_structure() {
        let mut proto = AuthAes128::new(AuthHash::Sha1);
        let si = info(None);
        proto.set_server_info(&si);
        let head = b"\x03\x13clients3.google.com\x00\x50";
        let packet = proto.pre_encrypt(head).unwrap();

        // check head: 1 random byte + 6 bytes of HMAC(iv||key, byte).
        let mac_seed = [si.iv.as_slice(), si.key.as_slice()].concat();
        let head_mac = hmac_sha1(&mac_seed, &packet[..1]);
        assert_eq!(&packet[1..7], &head_mac[..6]);

        // auth block: uid(4) + aes(16) + hmac[..4].
        let auth_mac = hmac_sha1(&mac_seed, &packet[7..27]);
        assert_eq!(&packet[27..31], &auth_mac[..4]);

        // whole-packet tail under the user key (defaults to cipher key).
        let tail = hmac_sha1(&si.key, &packet[..packet.len() - 4]);
        assert_eq!(&packet[packet.len() - 4..], &tail[..4]);

        assert!(packet.len() >= 7 + 24 + head.len() + 4);
    }

    #[test]
    fn auth_aes128_data_packets_verify_and_strip() {
        // Drive a client and hand-verify its packets like a server, then
        // feed server-shaped packets back through post_decrypt.
        let mut client = AuthAes128::new(AuthHash::Md5);
        let si = info(None);
        client.set_server_info(&si);
        let _first = client.pre_encrypt(b"\x01\x7f\x00\x00\x01\x00\x50").unwrap();

        let packet = client.pre_encrypt(b"second write").unwrap();
        let mut mac_key = si.key.clone();
        mac_key.extend_from_slice(&1u32.to_le_bytes());
        let declared = u16::from_le_bytes([packet[0], packet[1]]) as usize;
        assert_eq!(declared, packet.len());
        let len_mac = hmac_md5(&mac_key, &packet[..2]);
        assert_eq!(&packet[2..4], &len_mac[..2]);

        // Server->client packets use the same format keyed by recv_id.
        let mut server = AuthAes128::new(AuthHash::Md5);
        server.set_server_info(&si);
        server.pack_id = 1;
        let reply = server.pack_data(b"HTTP/1.1 204 No Content\r\n\r\n");
        let plain = client.post_decrypt(&reply).unwrap();
        assert_eq!(plain, b"HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn auth_aes128_rejects_tampered_checksum() {
        let mut client = AuthAes128::new(AuthHash::Sha1);
        client.set_server_info(&info(None));
        let mut server = AuthAes128::new(AuthHash::Sha1);
        server.set_server_info(&info(None));
        let mut reply = server.pack_data(b"payload");
        let last = reply.len() - 1;
        reply[last] ^= 0x01;
        assert!(client.post_decrypt(&reply).is_err());
    }

    #[test]
    fn auth_aes128_uid_param() {
        let mut proto = AuthAes128::new(AuthHash::Md5);
        proto.set_server_info(&info(Some("1234:secret")));
        assert_eq!(proto.user_id, 1234u32.to_le_bytes());
        assert_eq!(proto.user_key, rp_core::crypto::hash::md5(b"secret").to_vec());
    }

    #[test]
    fn xorshift_is_deterministic_per_seed() {
        let mut a = XorShift128Plus::new();
        let mut b = XorShift128Plus::new();
        a.init_from_bin_len(&[7u8; 16], 600);
        b.init_from_bin_len(&[7u8; 16], 600);
        assert_eq!(a.next(), b.next());
        let mut c = XorShift128Plus::new();
        c.init_from_bin_len(&[7u8; 16], 601);
        assert_ne!(a.next(), c.next());
    }

    #[test]
    fn rc4_keystream_roundtrip() {
        let mut enc = Rc4State::new(b"some-long-chain-key-material-48-bytes-or-so!!");
        let mut dec = Rc4State::new(b"some-long-chain-key-material-48-bytes-or-so!!");
        let mut data = b"payload bytes".to_vec();
        enc.apply(&mut data);
        assert_ne!(&data, b"payload bytes");
        dec.apply(&mut data);
        assert_eq!(&data, b"payload bytes");
    }

    #[test]
    fn auth_chain_roundtrip_against_mirrored_server() {
        // Build client and a mirrored "server" sharing the hashes so the
        // server can produce packets the client accepts.
        let si = info(None);
        let mut client = AuthChainA::new();
        client.set_server_info(&si);
        let first = client
            .pre_encrypt(b"\x03\x13clients3.google.com\x00\x50GET /")
            .unwrap();
        assert!(first.len() >= 36);

        // The server derives its send cipher from last_server_hash and
        // answers with the mss-prefixed first packet.
        let mut srv_cipher = Rc4State::new(
            format!(
                "{}{}",
                base64_std(&client.user_key),
                base64_std(&client.last_server_hash)
            )
            .as_bytes(),
        );
        let mut payload = Vec::from(&1460u16.to_le_bytes()[..]);
        payload.extend_from_slice(b"HTTP/1.1 204 No Content\r\n\r\n");
        let mut encrypted = payload.clone();
        srv_cipher.apply(&mut encrypted);

        let mask = u16::from_le_bytes(client.last_server_hash[14..16].try_into().unwrap());
        let mut random = XorShift128Plus::new();
        let rand_len = AuthChainA::rnd_data_len(
            encrypted.len(),
            &client.last_server_hash,
            &mut random,
        );
        let mut padding = vec![0xAA; rand_len];
        let start = AuthChainA::rnd_start_pos(rand_len, &mut random);

        let mut packet = Vec::new();
        packet.extend_from_slice(&((encrypted.len() as u16) ^ mask).to_le_bytes());
        packet.extend_from_slice(&padding[..start]);
        packet.extend_from_slice(&encrypted);
        padding.drain(..start);
        packet.extend_from_slice(&padding);
        let mut mac_key = client.user_key.clone();
        mac_key.extend_from_slice(&1u32.to_le_bytes());
        let hash = hmac_md5(&mac_key, &packet);
        packet.extend_from_slice(&hash[..2]);

        let plain = client.post_decrypt(&packet).unwrap();
        assert_eq!(plain, b"HTTP/1.1 204 No Content\r\n\r\n");
    }
}
