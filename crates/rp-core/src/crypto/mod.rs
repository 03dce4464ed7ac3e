//! Crypto primitives shared by the protocol connectors.
//!
//! Key derivation and HKDF subkeys for Shadowsocks, the AEAD seal/open
//! wrapper with the little-endian counter nonce, the legacy stream
//! cipher set used by SS/SSR, and the truncated HMAC helpers the SSR
//! plugins authenticate with.

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod stream;

pub use aead::AeadCipherKind;
pub use kdf::{derive_key, derive_subkey, generate_salt};
pub use stream::StreamCipherKind;

/// Whether a cipher name belongs to the AEAD set.
#[must_use]
pub fn is_aead_cipher(name: &str) -> bool {
    AeadCipherKind::from_name(name).is_some()
}

/// Whether a cipher name belongs to the legacy stream set.
#[must_use]
pub fn is_stream_cipher(name: &str) -> bool {
    StreamCipherKind::from_name(name).is_some()
}
