//! Key derivation for Shadowsocks-family protocols.

use hkdf::Hkdf;
use md5::{Digest, Md5};
use rand::RngCore;
use sha1::Sha1;

/// HKDF info string fixed by SIP004.
const SS_SUBKEY_INFO: &[u8] = b"ss-subkey";

/// EVP-style MD5 key extension: `D1 = MD5(password)`,
/// `Di = MD5(D(i-1) || password)`, concatenated and truncated to
/// `key_len` bytes. Deterministic for a given (password, key_len).
#[must_use]
pub fn derive_key(password: &str, key_len: usize) -> Vec<u8> {
    let mut derived: Vec<u8> = Vec::with_capacity(key_len + 16);
    let mut last: Option<[u8; 16]> = None;
    while derived.len() < key_len {
        let mut hasher = Md5::new();
        if let Some(prev) = last {
            hasher.update(prev);
        }
        hasher.update(password.as_bytes());
        let digest: [u8; 16] = hasher.finalize().into();
        derived.extend_from_slice(&digest);
        last = Some(digest);
    }
    derived.truncate(key_len);
    derived
}

/// Session subkey for SS-AEAD: `HKDF-SHA1(salt, psk, "ss-subkey")`
/// expanded to the cipher key length. Salt length equals the key length.
#[must_use]
pub fn derive_subkey(master_key: &[u8], salt: &[u8], key_len: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master_key);
    let mut okm = vec![0u8; key_len];
    hk.expand(SS_SUBKEY_INFO, &mut okm)
        .expect("ss-subkey expand length is always within HKDF bounds");
    okm
}

/// Random salt (or IV) for a new session.
#[must_use]
pub fn generate_salt(size: usize) -> Vec<u8> {
    let mut salt = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
