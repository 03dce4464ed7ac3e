//! AEAD seal/open for the Shadowsocks data path.
//!
//! Nonces are explicit: Shadowsocks uses a 12-byte little-endian
//! counter per direction starting at zero, bumped once per AEAD
//! operation (length and payload count separately). The counter lives
//! with the stream state; this module only turns it into nonce bytes,
//! so a nonce can never be reused under one subkey without the caller
//! rolling its monotonic counter backwards.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit, Nonce as GcmNonce};
use chacha20poly1305::{ChaCha20Poly1305, Nonce as ChaNonce};

use crate::error::{ProbeError, Result};

/// AEAD ciphers accepted on the Shadowsocks data path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadCipherKind {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl AeadCipherKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "aes-128-gcm" => Some(Self::Aes128Gcm),
            "aes-256-gcm" => Some(Self::Aes256Gcm),
            "chacha20-poly1305" | "chacha20-ietf-poly1305" => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }

    #[must_use]
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
        }
    }

    /// Salt length equals key length (SIP004).
    #[must_use]
    pub fn salt_len(&self) -> usize {
        self.key_len()
    }

    #[must_use]
    pub fn nonce_len(&self) -> usize {
        12
    }

    #[must_use]
    pub fn tag_len(&self) -> usize {
        16
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Aes256Gcm => "aes-256-gcm",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Seals `plaintext` with an explicit nonce; output carries the tag.
    pub fn seal(&self, key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal_with_aad(key, nonce, plaintext, &[])
    }

    /// Seals with associated data bound into the tag.
    pub fn seal_with_aad(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        match self {
            Self::Aes128Gcm => Aes128Gcm::new_from_slice(key)
                .map_err(|_| ProbeError::crypto("bad aes-128-gcm key length"))?
                .encrypt(GcmNonce::from_slice(nonce), payload)
                .map_err(|_| ProbeError::crypto("aes-128-gcm seal failed")),
            Self::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|_| ProbeError::crypto("bad aes-256-gcm key length"))?
                .encrypt(GcmNonce::from_slice(nonce), payload)
                .map_err(|_| ProbeError::crypto("aes-256-gcm seal failed")),
            Self::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| ProbeError::crypto("bad chacha20-poly1305 key length"))?
                .encrypt(ChaNonce::from_slice(nonce), payload)
                .map_err(|_| ProbeError::crypto("chacha20-poly1305 seal failed")),
        }
    }

    /// Opens `ciphertext` (payload‖tag). A tag mismatch is fatal to the
    /// connection; callers drop the stream on error.
    pub fn open(&self, key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.open_with_aad(key, nonce, ciphertext, &[])
    }

    /// Opens with associated data checked against the tag.
    pub fn open_with_aad(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match self {
            Self::Aes128Gcm => Aes128Gcm::new_from_slice(key)
                .map_err(|_| ProbeError::crypto("bad aes-128-gcm key length"))?
                .decrypt(GcmNonce::from_slice(nonce), payload)
                .map_err(|_| ProbeError::crypto("aes-128-gcm tag mismatch")),
            Self::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|_| ProbeError::crypto("bad aes-256-gcm key length"))?
                .decrypt(GcmNonce::from_slice(nonce), payload)
                .map_err(|_| ProbeError::crypto("aes-256-gcm tag mismatch")),
            Self::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| ProbeError::crypto("bad chacha20-poly1305 key length"))?
                .decrypt(ChaNonce::from_slice(nonce), payload)
                .map_err(|_| ProbeError::crypto("chacha20-poly1305 tag mismatch")),
        }
    }
}

/// Little-endian counter nonce for the SS data path.
#[must_use]
pub fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}
