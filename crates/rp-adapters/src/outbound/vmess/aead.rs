//! VMess AEAD header primitives: the recursive HMAC-SHA256 KDF, the
//! sealed auth id, and the labeled keys protecting the request and
//! response headers.
//!
//! The KDF nests HMACs: the innermost hash is HMAC keyed with
//! `"VMess AEAD KDF"` over SHA-256, and every path label wraps the
//! previous construction as the hash function of a new HMAC. Keys and
//! labels here are short, so the digest is computed in one shot.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use sha2::{Digest, Sha256};

use rp_core::error::{ProbeError, Result};

pub const KDF_SALT: &[u8] = b"VMess AEAD KDF";
pub const LABEL_AUTH_ID: &[u8] = b"AES Auth ID Encryption";
pub const LABEL_HEADER_KEY: &[u8] = b"VMess Header AEAD Key";
pub const LABEL_HEADER_NONCE: &[u8] = b"VMess Header AEAD Nonce";
pub const LABEL_LENGTH_KEY: &[u8] = b"VMess Header AEAD Key_Length";
pub const LABEL_LENGTH_NONCE: &[u8] = b"VMess Header AEAD Nonce_Length";
pub const LABEL_RESP_LEN_KEY: &[u8] = b"AEAD Resp Header Len Key";
pub const LABEL_RESP_LEN_NONCE: &[u8] = b"AEAD Resp Header Len IV";
pub const LABEL_RESP_KEY: &[u8] = b"AEAD Resp Header Key";
pub const LABEL_RESP_NONCE: &[u8] = b"AEAD Resp Header IV";

const HMAC_BLOCK: usize = 64;

/// A hash function in the recursive chain: SHA-256 at the root, an
/// HMAC over its parent everywhere else.
enum ChainHash<'a> {
    Sha256,
    Hmac { key: &'a [u8], parent: &'a ChainHash<'a> },
}

impl ChainHash<'_> {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        match self {
            ChainHash::Sha256 => {
                let mut h = Sha256::new();
                h.update(data);
                h.finalize().into()
            }
            ChainHash::Hmac { key, parent } => {
                let mut k = if key.len() > HMAC_BLOCK {
                    parent.digest(key).to_vec()
                } else {
                    key.to_vec()
                };
                k.resize(HMAC_BLOCK, 0);

                let mut inner = Vec::with_capacity(HMAC_BLOCK + data.len());
                inner.extend(k.iter().map(|b| b ^ 0x36));
                inner.extend_from_slice(data);
                let inner_digest = parent.digest(&inner);

                let mut outer = Vec::with_capacity(HMAC_BLOCK + 32);
                outer.extend(k.iter().map(|b| b ^ 0x5c));
                outer.extend_from_slice(&inner_digest);
                parent.digest(&outer)
            }
        }
    }
}

/// `KDF(key, path…)`: each label wraps the chain once, then the key is
/// digested through the whole stack.
#[must_use]
pub fn kdf(key: &[u8], path: &[&[u8]]) -> [u8; 32] {
    let root = ChainHash::Sha256;
    let base = ChainHash::Hmac {
        key: KDF_SALT,
        parent: &root,
    };
    match path {
        [] => base.digest(key),
        [l1] => ChainHash::Hmac { key: l1, parent: &base }.digest(key),
        [l1, l2] => {
            let h1 = ChainHash::Hmac { key: l1, parent: &base };
            ChainHash::Hmac { key: l2, parent: &h1 }.digest(key)
        }
        [l1, l2, l3] => {
            let h1 = ChainHash::Hmac { key: l1, parent: &base };
            let h2 = ChainHash::Hmac { key: l2, parent: &h1 };
            ChainHash::Hmac { key: l3, parent: &h2 }.digest(key)
        }
        _ => unreachable!("vmess kdf paths are at most three labels"),
    }
}

#[must_use]
pub fn kdf16(key: &[u8], path: &[&[u8]]) -> [u8; 16] {
    let full = kdf(key, path);
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

#[must_use]
pub fn kdf12(key: &[u8], path: &[&[u8]]) -> [u8; 12] {
    let full = kdf(key, path);
    let mut out = [0u8; 12];
    out.copy_from_slice(&full[..12]);
    out
}

/// Sealed 16-byte auth id: `ts(8,BE) ‖ rand(4) ‖ crc32(first 12)`,
/// AES-128 encrypted under the auth-id key derived from the command
/// key.
pub fn seal_auth_id(cmd_key: &[u8; 16], timestamp: u64, random: [u8; 4]) -> Result<[u8; 16]> {
    let mut block = [0u8; 16];
    block[..8].copy_from_slice(&timestamp.to_be_bytes());
    block[8..12].copy_from_slice(&random);
    let crc = crc32fast::hash(&block[..12]);
    block[12..].copy_from_slice(&crc.to_be_bytes());

    let key = kdf16(cmd_key, &[LABEL_AUTH_ID]);
    let cipher = Aes128::new_from_slice(&key)
        .map_err(|_| ProbeError::internal("auth id key must be 16 bytes"))?;
    let mut ga = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut ga);
    let mut out = [0u8; 16];
    out.copy_from_slice(&ga);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic_and_label_sensitive() {
        let key = [7u8; 16];
        let a = kdf(&key, &[LABEL_HEADER_KEY]);
        let b = kdf(&key, &[LABEL_HEADER_KEY]);
        let c = kdf(&key, &[LABEL_HEADER_NONCE]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(kdf(&key, &[]), a);
    }

    #[test]
    fn kdf_nesting_order_matters() {
        let key = [1u8; 16];
        let ab = kdf(&key, &[b"a", b"b"]);
        let ba = kdf(&key, &[b"b", b"a"]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn kdf_differs_from_flat_hmac_chain() {
        // The nested construction must not degenerate into
        // HMAC(HMAC(salt, key), label).
        use hmac::{Hmac, Mac};
        type HmacSha256 = Hmac<Sha256>;
        let key = [3u8; 16];
        let mut mac = <HmacSha256 as Mac>::new_from_slice(KDF_SALT).unwrap();
        mac.update(&key);
        let k1 = mac.finalize().into_bytes();
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&k1).unwrap();
        mac.update(LABEL_HEADER_KEY);
        let flat: [u8; 32] = mac.finalize().into_bytes().into();
        assert_ne!(kdf(&key, &[LABEL_HEADER_KEY]), flat);
    }

    #[test]
    fn auth_id_changes_with_inputs() {
        let cmd_key = [9u8; 16];
        let a = seal_auth_id(&cmd_key, 1_700_000_000, [1, 2, 3, 4]).unwrap();
        let b = seal_auth_id(&cmd_key, 1_700_000_000, [1, 2, 3, 5]).unwrap();
        let c = seal_auth_id(&cmd_key, 1_700_000_001, [1, 2, 3, 4]).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, seal_auth_id(&cmd_key, 1_700_000_000, [1, 2, 3, 4]).unwrap());
    }
}
