//! Legacy stream ciphers for Shadowsocks and ShadowsocksR.
//!
//! The sender prefixes a random IV of the cipher's IV length; every
//! byte after that is transformed by a continuous keystream. CFB needs
//! distinct encrypt/decrypt state, so the two directions are separate
//! types built from the same kind.

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::cipher::{KeyIvInit, StreamCipher};
use rc4::KeyInit;

use crate::crypto::hash::md5;

type Aes128CfbEnc = cfb_mode::BufEncryptor<Aes128>;
type Aes192CfbEnc = cfb_mode::BufEncryptor<Aes192>;
type Aes256CfbEnc = cfb_mode::BufEncryptor<Aes256>;
type Aes128CfbDec = cfb_mode::BufDecryptor<Aes128>;
type Aes192CfbDec = cfb_mode::BufDecryptor<Aes192>;
type Aes256CfbDec = cfb_mode::BufDecryptor<Aes256>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Rc4 = rc4::Rc4<rc4::consts::U16>;

/// Stream cipher methods recognized in SS/SSR configurations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamCipherKind {
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Rc4Md5,
    Chacha20,
    Chacha20Ietf,
    Salsa20,
    None,
}

impl StreamCipherKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "aes-128-cfb" => Some(Self::Aes128Cfb),
            "aes-192-cfb" => Some(Self::Aes192Cfb),
            "aes-256-cfb" => Some(Self::Aes256Cfb),
            "aes-128-ctr" => Some(Self::Aes128Ctr),
            "aes-192-ctr" => Some(Self::Aes192Ctr),
            "aes-256-ctr" => Some(Self::Aes256Ctr),
            "rc4-md5" => Some(Self::Rc4Md5),
            "chacha20" => Some(Self::Chacha20),
            "chacha20-ietf" => Some(Self::Chacha20Ietf),
            "salsa20" => Some(Self::Salsa20),
            "none" | "plain" => Some(Self::None),
            _ => None,
        }
    }

    #[must_use]
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Cfb | Self::Aes128Ctr | Self::Rc4Md5 => 16,
            Self::Aes192Cfb | Self::Aes192Ctr => 24,
            Self::Aes256Cfb
            | Self::Aes256Ctr
            | Self::Chacha20
            | Self::Chacha20Ietf
            | Self::Salsa20 => 32,
            Self::None => 16,
        }
    }

    #[must_use]
    pub fn iv_len(&self) -> usize {
        match self {
            Self::Aes128Cfb
            | Self::Aes192Cfb
            | Self::Aes256Cfb
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr
            | Self::Rc4Md5 => 16,
            Self::Chacha20 | Self::Salsa20 => 8,
            Self::Chacha20Ietf => 12,
            Self::None => 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes128Cfb => "aes-128-cfb",
            Self::Aes192Cfb => "aes-192-cfb",
            Self::Aes256Cfb => "aes-256-cfb",
            Self::Aes128Ctr => "aes-128-ctr",
            Self::Aes192Ctr => "aes-192-ctr",
            Self::Aes256Ctr => "aes-256-ctr",
            Self::Rc4Md5 => "rc4-md5",
            Self::Chacha20 => "chacha20",
            Self::Chacha20Ietf => "chacha20-ietf",
            Self::Salsa20 => "salsa20",
            Self::None => "none",
        }
    }

    /// Builds the send-direction state for `(key, iv)`.
    #[must_use]
    pub fn encryptor(&self, key: &[u8], iv: &[u8]) -> StreamEncryptor {
        StreamEncryptor(EncState::init(*self, key, iv))
    }

    /// Builds the receive-direction state for `(key, iv)`.
    #[must_use]
    pub fn decryptor(&self, key: &[u8], iv: &[u8]) -> StreamDecryptor {
        StreamDecryptor(DecState::init(*self, key, iv))
    }
}

/// rc4-md5 session key: MD5(key || iv), 16 bytes.
fn rc4_md5_key(key: &[u8], iv: &[u8]) -> [u8; 16] {
    let mut seed = Vec::with_capacity(key.len() + iv.len());
    seed.extend_from_slice(key);
    seed.extend_from_slice(iv);
    md5(&seed)
}

enum EncState {
    Aes128Cfb(Box<Aes128CfbEnc>),
    Aes192Cfb(Box<Aes192CfbEnc>),
    Aes256Cfb(Box<Aes256CfbEnc>),
    Ctr128(Box<Aes128Ctr>),
    Ctr192(Box<Aes192Ctr>),
    Ctr256(Box<Aes256Ctr>),
    Rc4(Box<Rc4>),
    Chacha20(Box<chacha20::ChaCha20Legacy>),
    Chacha20Ietf(Box<chacha20::ChaCha20>),
    Salsa20(Box<salsa20::Salsa20>),
    None,
}

enum DecState {
    Aes128Cfb(Box<Aes128CfbDec>),
    Aes192Cfb(Box<Aes192CfbDec>),
    Aes256Cfb(Box<Aes256CfbDec>),
    Ctr128(Box<Aes128Ctr>),
    Ctr192(Box<Aes192Ctr>),
    Ctr256(Box<Aes256Ctr>),
    Rc4(Box<Rc4>),
    Chacha20(Box<chacha20::ChaCha20Legacy>),
    Chacha20Ietf(Box<chacha20::ChaCha20>),
    Salsa20(Box<salsa20::Salsa20>),
    None,
}

impl EncState {
    fn init(kind: StreamCipherKind, key: &[u8], iv: &[u8]) -> Self {
        match kind {
            StreamCipherKind::Aes128Cfb => Self::Aes128Cfb(Box::new(
                Aes128CfbEnc::new_from_slices(key, iv).expect("aes-128-cfb key/iv lengths"),
            )),
            StreamCipherKind::Aes192Cfb => Self::Aes192Cfb(Box::new(
                Aes192CfbEnc::new_from_slices(key, iv).expect("aes-192-cfb key/iv lengths"),
            )),
            StreamCipherKind::Aes256Cfb => Self::Aes256Cfb(Box::new(
                Aes256CfbEnc::new_from_slices(key, iv).expect("aes-256-cfb key/iv lengths"),
            )),
            StreamCipherKind::Aes128Ctr => Self::Ctr128(Box::new(
                Aes128Ctr::new_from_slices(key, iv).expect("aes-128-ctr key/iv lengths"),
            )),
            StreamCipherKind::Aes192Ctr => Self::Ctr192(Box::new(
                Aes192Ctr::new_from_slices(key, iv).expect("aes-192-ctr key/iv lengths"),
            )),
            StreamCipherKind::Aes256Ctr => Self::Ctr256(Box::new(
                Aes256Ctr::new_from_slices(key, iv).expect("aes-256-ctr key/iv lengths"),
            )),
            StreamCipherKind::Rc4Md5 => {
                let session = rc4_md5_key(key, iv);
                Self::Rc4(Box::new(
                    Rc4::new_from_slice(&session).expect("rc4-md5 session key length"),
                ))
            }
            StreamCipherKind::Chacha20 => Self::Chacha20(Box::new(
                chacha20::ChaCha20Legacy::new_from_slices(key, iv)
                    .expect("chacha20 key/nonce lengths"),
            )),
            StreamCipherKind::Chacha20Ietf => Self::Chacha20Ietf(Box::new(
                chacha20::ChaCha20::new_from_slices(key, iv)
                    .expect("chacha20-ietf key/nonce lengths"),
            )),
            StreamCipherKind::Salsa20 => Self::Salsa20(Box::new(
                salsa20::Salsa20::new_from_slices(key, iv).expect("salsa20 key/nonce lengths"),
            )),
            StreamCipherKind::None => Self::None,
        }
    }
}

impl DecState {
    fn init(kind: StreamCipherKind, key: &[u8], iv: &[u8]) -> Self {
        match kind {
            StreamCipherKind::Aes128Cfb => Self::Aes128Cfb(Box::new(
                Aes128CfbDec::new_from_slices(key, iv).expect("aes-128-cfb key/iv lengths"),
            )),
            StreamCipherKind::Aes192Cfb => Self::Aes192Cfb(Box::new(
                Aes192CfbDec::new_from_slices(key, iv).expect("aes-192-cfb key/iv lengths"),
            )),
            StreamCipherKind::Aes256Cfb => Self::Aes256Cfb(Box::new(
                Aes256CfbDec::new_from_slices(key, iv).expect("aes-256-cfb key/iv lengths"),
            )),
            StreamCipherKind::Aes128Ctr => Self::Ctr128(Box::new(
                Aes128Ctr::new_from_slices(key, iv).expect("aes-128-ctr key/iv lengths"),
            )),
            StreamCipherKind::Aes192Ctr => Self::Ctr192(Box::new(
                Aes192Ctr::new_from_slices(key, iv).expect("aes-192-ctr key/iv lengths"),
            )),
            StreamCipherKind::Aes256Ctr => Self::Ctr256(Box::new(
                Aes256Ctr::new_from_slices(key, iv).expect("aes-256-ctr key/iv lengths"),
            )),
            StreamCipherKind::Rc4Md5 => {
                let session = rc4_md5_key(key, iv);
                Self::Rc4(Box::new(
                    Rc4::new_from_slice(&session).expect("rc4-md5 session key length"),
                ))
            }
            StreamCipherKind::Chacha20 => Self::Chacha20(Box::new(
                chacha20::ChaCha20Legacy::new_from_slices(key, iv)
                    .expect("chacha20 key/nonce lengths"),
            )),
            StreamCipherKind::Chacha20Ietf => Self::Chacha20Ietf(Box::new(
                chacha20::ChaCha20::new_from_slices(key, iv)
                    .expect("chacha20-ietf key/nonce lengths"),
            )),
            StreamCipherKind::Salsa20 => Self::Salsa20(Box::new(
                salsa20::Salsa20::new_from_slices(key, iv).expect("salsa20 key/nonce lengths"),
            )),
            StreamCipherKind::None => Self::None,
        }
    }
}

/// Send-direction keystream state.
pub struct StreamEncryptor(EncState);

impl StreamEncryptor {
    /// Transforms `data` in place, advancing the keystream.
    pub fn apply(&mut self, data: &mut [u8]) {
        match &mut self.0 {
            EncState::Aes128Cfb(c) => c.encrypt(data),
            EncState::Aes192Cfb(c) => c.encrypt(data),
            EncState::Aes256Cfb(c) => c.encrypt(data),
            EncState::Ctr128(c) => c.apply_keystream(data),
            EncState::Ctr192(c) => c.apply_keystream(data),
            EncState::Ctr256(c) => c.apply_keystream(data),
            EncState::Rc4(c) => c.apply_keystream(data),
            EncState::Chacha20(c) => c.apply_keystream(data),
            EncState::Chacha20Ietf(c) => c.apply_keystream(data),
            EncState::Salsa20(c) => c.apply_keystream(data),
            EncState::None => {}
        }
    }
}

/// Receive-direction keystream state.
pub struct StreamDecryptor(DecState);

impl StreamDecryptor {
    /// Transforms `data` in place, advancing the keystream.
    pub fn apply(&mut self, data: &mut [u8]) {
        match &mut self.0 {
            DecState::Aes128Cfb(c) => c.decrypt(data),
            DecState::Aes192Cfb(c) => c.decrypt(data),
            DecState::Aes256Cfb(c) => c.decrypt(data),
            DecState::Ctr128(c) => c.apply_keystream(data),
            DecState::Ctr192(c) => c.apply_keystream(data),
            DecState::Ctr256(c) => c.apply_keystream(data),
            DecState::Rc4(c) => c.apply_keystream(data),
            DecState::Chacha20(c) => c.apply_keystream(data),
            DecState::Chacha20Ietf(c) => c.apply_keystream(data),
            DecState::Salsa20(c) => c.apply_keystream(data),
            DecState::None => {}
        }
    }
}
