//! VMess data stream: response-header verification followed by
//! length-prefixed chunks.
//!
//! Chunk nonces are `count(2,BE) ‖ body_iv[2..12]` with separate
//! monotonic counters per direction. ChaCha20-Poly1305 expands its
//! 16-byte body key to 32 bytes as `MD5(key) ‖ MD5(MD5(key))`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use aes::Aes128;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use rp_core::crypto::aead::AeadCipherKind;
use rp_core::crypto::hash::md5;
use rp_core::error::{ProbeError, Result};

use crate::outbound::iohelper::{
    poll_drain, poll_read_exact, serve_buffered, to_io, WriteBuffer,
};

type Aes128CfbDec = cfb_mode::BufDecryptor<Aes128>;

/// Largest plaintext chunk the writer emits; the length prefix counts
/// ciphertext and must stay within 16 KiB for interop.
const MAX_CHUNK: usize = 16 * 1024 - 64;

/// Data-path security negotiated in the request header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Security {
    Aes128Gcm,
    ChaCha20Poly1305,
    None,
}

impl Security {
    pub fn from_option(name: &str) -> Result<Self> {
        match name {
            // Auto resolves to AES-GCM, the hardware-friendly default.
            "auto" | "aes-128-gcm" | "" => Ok(Self::Aes128Gcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            "none" => Ok(Self::None),
            other => Err(ProbeError::UnsupportedConfig(format!(
                "unknown vmess security {other:?}"
            ))),
        }
    }

    /// Low nibble of the P|Sec header byte.
    pub fn wire_byte(&self) -> u8 {
        match self {
            Self::Aes128Gcm => 0x03,
            Self::ChaCha20Poly1305 => 0x04,
            Self::None => 0x05,
        }
    }

    fn aead(&self) -> Option<AeadCipherKind> {
        match self {
            Self::Aes128Gcm => Some(AeadCipherKind::Aes128Gcm),
            Self::ChaCha20Poly1305 => Some(AeadCipherKind::ChaCha20Poly1305),
            Self::None => None,
        }
    }

    /// Data key for one direction from the 16-byte body key.
    fn data_key(&self, body_key: &[u8; 16]) -> Vec<u8> {
        match self {
            Self::ChaCha20Poly1305 => {
                let first = md5(body_key);
                let second = md5(&first);
                let mut key = Vec::with_capacity(32);
                key.extend_from_slice(&first);
                key.extend_from_slice(&second);
                key
            }
            _ => body_key.to_vec(),
        }
    }
}

fn chunk_nonce(count: u16, body_iv: &[u8; 16]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..2].copy_from_slice(&count.to_be_bytes());
    nonce[2..].copy_from_slice(&body_iv[2..12]);
    nonce
}

/// How the response header is protected.
pub(crate) enum RespMode {
    /// Legacy: 4-byte header under AES-128-CFB with MD5-derived keys.
    Legacy { dec: Box<Aes128CfbDec> },
    /// AEAD: sealed length then sealed header under KDF-labeled keys.
    Aead {
        len_key: [u8; 16],
        len_nonce: [u8; 12],
        header_key: [u8; 16],
        header_nonce: [u8; 12],
    },
}

enum RespState {
    LegacyHeader { buf: [u8; 4], pos: usize },
    LegacyCmd { buf: Vec<u8>, pos: usize },
    AeadLen { buf: [u8; 18], pos: usize },
    AeadHeader { buf: Vec<u8>, pos: usize },
    Ready,
}

enum ChunkState {
    Len { buf: [u8; 2], pos: usize },
    Data { buf: Vec<u8>, pos: usize },
    Eof,
}

/// Client side of a VMess tunnel, past the request header.
pub(crate) struct VmessStream<S> {
    inner: S,
    security: Security,
    send_key: Vec<u8>,
    send_iv: [u8; 16],
    recv_key: Vec<u8>,
    recv_iv: [u8; 16],
    send_count: u16,
    recv_count: u16,
    response_auth: u8,
    resp_mode: RespMode,
    resp_state: RespState,
    chunk_state: ChunkState,
    plain: Vec<u8>,
    cursor: usize,
    pending: Option<WriteBuffer>,
}

impl<S> VmessStream<S> {
    pub fn new(
        inner: S,
        security: Security,
        body_key: [u8; 16],
        body_iv: [u8; 16],
        resp_body_key: [u8; 16],
        resp_body_iv: [u8; 16],
        response_auth: u8,
        resp_mode: RespMode,
    ) -> Self {
        let resp_state = match &resp_mode {
            RespMode::Legacy { .. } => RespState::LegacyHeader {
                buf: [0u8; 4],
                pos: 0,
            },
            RespMode::Aead { .. } => RespState::AeadLen {
                buf: [0u8; 18],
                pos: 0,
            },
        };
        Self {
            inner,
            security,
            send_key: security.data_key(&body_key),
            send_iv: body_iv,
            recv_key: security.data_key(&resp_body_key),
            recv_iv: resp_body_iv,
            send_count: 0,
            recv_count: 0,
            response_auth,
            resp_mode,
            resp_state,
            chunk_state: ChunkState::Len {
                buf: [0u8; 2],
                pos: 0,
            },
            plain: Vec::new(),
            cursor: 0,
            pending: None,
        }
    }

    fn seal_chunk(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match self.security.aead() {
            Some(kind) => {
                let nonce = chunk_nonce(self.send_count, &self.send_iv);
                let sealed = kind.seal(&self.send_key, &nonce, payload)?;
                out.extend_from_slice(&(sealed.len() as u16).to_be_bytes());
                out.extend_from_slice(&sealed);
            }
            None => {
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(payload);
            }
        }
        self.send_count = self.send_count.wrapping_add(1);
        Ok(())
    }

    fn open_chunk(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let opened = match self.security.aead() {
            Some(kind) => {
                let nonce = chunk_nonce(self.recv_count, &self.recv_iv);
                kind.open(&self.recv_key, &nonce, data)?
            }
            None => data.to_vec(),
        };
        self.recv_count = self.recv_count.wrapping_add(1);
        Ok(opened)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> VmessStream<S> {
    /// Drives the response-header verification; Ready(()) once done.
    fn poll_response(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            match &mut self.resp_state {
                RespState::LegacyHeader { buf, pos } => {
                    match poll_read_exact(&mut self.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            let mut header = *buf;
                            let RespMode::Legacy { dec } = &mut self.resp_mode else {
                                return Poll::Ready(Err(io::Error::other(
                                    "legacy state without legacy mode",
                                )));
                            };
                            dec.decrypt(&mut header);
                            if header[0] != self.response_auth {
                                return Poll::Ready(Err(to_io(ProbeError::handshake(
                                    "vmess response auth mismatch",
                                ))));
                            }
                            let cmd_len = header[3] as usize;
                            if cmd_len > 0 {
                                self.resp_state = RespState::LegacyCmd {
                                    buf: vec![0u8; cmd_len],
                                    pos: 0,
                                };
                            } else {
                                self.resp_state = RespState::Ready;
                            }
                        }
                        Poll::Ready(Ok(false)) => {
                            return Poll::Ready(Err(to_io(ProbeError::handshake(
                                "vmess connection closed before response header",
                            ))))
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                RespState::LegacyCmd { buf, pos } => {
                    match poll_read_exact(&mut self.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            // Dynamic-port commands are irrelevant to a
                            // probe; decrypt and discard.
                            let RespMode::Legacy { dec } = &mut self.resp_mode else {
                                return Poll::Ready(Err(io::Error::other(
                                    "legacy state without legacy mode",
                                )));
                            };
                            dec.decrypt(buf);
                            self.resp_state = RespState::Ready;
                        }
                        Poll::Ready(Ok(false)) => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof inside vmess response command",
                            )))
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                RespState::AeadLen { buf, pos } => {
                    match poll_read_exact(&mut self.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            let RespMode::Aead {
                                len_key, len_nonce, ..
                            } = &self.resp_mode
                            else {
                                return Poll::Ready(Err(io::Error::other(
                                    "aead state without aead mode",
                                )));
                            };
                            let opened = AeadCipherKind::Aes128Gcm
                                .open(len_key, len_nonce, buf)
                                .map_err(|_| {
                                    to_io(ProbeError::handshake(
                                        "vmess response length auth failed",
                                    ))
                                })?;
                            let len = u16::from_be_bytes([opened[0], opened[1]]) as usize;
                            self.resp_state = RespState::AeadHeader {
                                buf: vec![0u8; len + 16],
                                pos: 0,
                            };
                        }
                        Poll::Ready(Ok(false)) => {
                            return Poll::Ready(Err(to_io(ProbeError::handshake(
                                "vmess connection closed before response header",
                            ))))
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                RespState::AeadHeader { buf, pos } => {
                    match poll_read_exact(&mut self.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            let RespMode::Aead {
                                header_key,
                                header_nonce,
                                ..
                            } = &self.resp_mode
                            else {
                                return Poll::Ready(Err(io::Error::other(
                                    "aead state without aead mode",
                                )));
                            };
                            let header = AeadCipherKind::Aes128Gcm
                                .open(header_key, header_nonce, buf)
                                .map_err(|_| {
                                    to_io(ProbeError::handshake(
                                        "vmess response header auth failed",
                                    ))
                                })?;
                            if header.first() != Some(&self.response_auth) {
                                return Poll::Ready(Err(to_io(ProbeError::handshake(
                                    "vmess response auth mismatch",
                                ))));
                            }
                            self.resp_state = RespState::Ready;
                        }
                        Poll::Ready(Ok(false)) => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof inside vmess response header",
                            )))
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                RespState::Ready => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncRead for VmessStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if serve_buffered(&mut this.plain, &mut this.cursor, out) {
            return Poll::Ready(Ok(()));
        }
        match this.poll_response(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }
        loop {
            match &mut this.chunk_state {
                ChunkState::Len { buf, pos } => {
                    match poll_read_exact(&mut this.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            let len = u16::from_be_bytes(*buf) as usize;
                            if len == 0 {
                                this.chunk_state = ChunkState::Eof;
                                return Poll::Ready(Ok(()));
                            }
                            this.chunk_state = ChunkState::Data {
                                buf: vec![0u8; len],
                                pos: 0,
                            };
                        }
                        Poll::Ready(Ok(false)) => {
                            this.chunk_state = ChunkState::Eof;
                            return Poll::Ready(Ok(()));
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                ChunkState::Data { buf, pos } => {
                    match poll_read_exact(&mut this.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            let data = std::mem::take(buf);
                            let opened = this.open_chunk(&data).map_err(to_io)?;
                            this.plain = opened;
                            this.cursor = 0;
                            this.chunk_state = ChunkState::Len {
                                buf: [0u8; 2],
                                pos: 0,
                            };
                            if serve_buffered(&mut this.plain, &mut this.cursor, out) {
                                return Poll::Ready(Ok(()));
                            }
                        }
                        Poll::Ready(Ok(false)) => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof inside vmess chunk",
                            )))
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                ChunkState::Eof => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncWrite for VmessStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.pending.is_none() {
            let mut out = Vec::with_capacity(buf.len() + 64);
            for chunk in buf.chunks(MAX_CHUNK) {
                this.seal_chunk(chunk, &mut out).map_err(to_io)?;
            }
            this.pending = Some(WriteBuffer::new(out, buf.len()));
        }
        poll_drain(&mut this.inner, cx, &mut this.pending)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pending.is_some() {
            match poll_drain(&mut this.inner, cx, &mut this.pending) {
                Poll::Ready(Ok(_)) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
