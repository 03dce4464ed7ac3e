//! Shadowsocks outbound connector.
//!
//! AEAD methods follow SIP004: the sender prefixes a random salt of key
//! length, derives the session subkey with HKDF-SHA1 and frames the
//! stream as `seal(len) ‖ seal(payload)` chunks of at most 0x3FFF
//! plaintext bytes, with a little-endian nonce counter per direction.
//! Legacy stream methods prefix a random IV and apply a continuous
//! keystream. The first payload is always the encoded target address.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

use rp_core::crypto::aead::{counter_nonce, AeadCipherKind};
use rp_core::crypto::kdf::{derive_key, derive_subkey, generate_salt};
use rp_core::crypto::stream::{StreamCipherKind, StreamDecryptor, StreamEncryptor};
use rp_core::dns::{default_resolver, Resolver};
use rp_core::error::{ProbeError, Result};
use rp_core::session::encode_addr;
use rp_core::Metadata;

use crate::outbound::iohelper::{
    poll_drain, poll_read_exact, serve_buffered, to_io, WriteBuffer,
};
use crate::traits::{connect_server, BoxedStream, DialOpts, OutboundConnector};

/// Largest plaintext chunk SIP004 allows.
const MAX_CHUNK: usize = 0x3FFF;

#[derive(Debug, Clone, Copy)]
enum CipherMode {
    Aead(AeadCipherKind),
    Stream(StreamCipherKind),
}

/// Shadowsocks outbound connector.
pub struct ShadowsocksConnector {
    server: String,
    port: u16,
    mode: CipherMode,
    master_key: Vec<u8>,
    resolver: Arc<dyn Resolver>,
}

impl std::fmt::Debug for ShadowsocksConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowsocksConnector")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("mode", &self.mode)
            .finish()
    }
}

impl ShadowsocksConnector {
    pub fn new(option: &rp_core::options::SsOption, resolver: Option<Arc<dyn Resolver>>) -> Result<Self> {
        let mode = if let Some(kind) = AeadCipherKind::from_name(&option.cipher) {
            CipherMode::Aead(kind)
        } else if let Some(kind) = StreamCipherKind::from_name(&option.cipher) {
            CipherMode::Stream(kind)
        } else {
            return Err(ProbeError::UnsupportedConfig(format!(
                "unknown shadowsocks cipher {}",
                option.cipher
            )));
        };
        let key_len = match mode {
            CipherMode::Aead(kind) => kind.key_len(),
            CipherMode::Stream(kind) => kind.key_len(),
        };
        Ok(Self {
            server: option.server.clone(),
            port: option.port,
            mode,
            master_key: derive_key(&option.password, key_len),
            resolver: resolver.unwrap_or_else(default_resolver),
        })
    }
}

#[async_trait]
impl OutboundConnector for ShadowsocksConnector {
    fn name(&self) -> &'static str {
        "shadowsocks"
    }

    async fn dial_context(&self, opts: &DialOpts, meta: &Metadata) -> Result<BoxedStream> {
        let _span = crate::outbound::span_dial("shadowsocks", meta);
        let mut tcp = connect_server(&self.resolver, &self.server, self.port, opts).await?;

        let mut addr = Vec::new();
        encode_addr(&meta.addr, meta.port, &mut addr);

        match self.mode {
            CipherMode::Aead(kind) => {
                let salt = generate_salt(kind.salt_len());
                let subkey = derive_subkey(&self.master_key, &salt, kind.key_len());

                let mut first = salt;
                let mut nonce = 0u64;
                seal_chunk(kind, &subkey, &mut nonce, &addr, &mut first)?;
                write_handshake(&mut tcp, &first, opts).await?;
                debug!(cipher = kind.name(), "shadowsocks aead tunnel ready");

                Ok(Box::new(SsAeadStream {
                    inner: tcp,
                    kind,
                    master_key: self.master_key.clone(),
                    send_key: subkey,
                    send_nonce: nonce,
                    recv_key: Vec::new(),
                    recv_nonce: 0,
                    state: ReadState::Salt {
                        buf: vec![0u8; kind.salt_len()],
                        pos: 0,
                    },
                    plain: Vec::new(),
                    cursor: 0,
                    pending: None,
                }))
            }
            CipherMode::Stream(kind) => {
                let iv = generate_salt(kind.iv_len());
                let mut enc = kind.encryptor(&self.master_key, &iv);
                enc.apply(&mut addr);

                let mut first = iv;
                first.extend_from_slice(&addr);
                write_handshake(&mut tcp, &first, opts).await?;
                debug!(cipher = kind.name(), "shadowsocks stream tunnel ready");

                let dec = (kind.iv_len() == 0).then(|| kind.decryptor(&self.master_key, &[]));
                Ok(Box::new(SsCipherStream {
                    inner: tcp,
                    kind,
                    master_key: self.master_key.clone(),
                    enc,
                    dec,
                    iv_buf: vec![0u8; kind.iv_len()],
                    iv_pos: 0,
                    pending: None,
                }))
            }
        }
    }
}

async fn write_handshake(tcp: &mut tokio::net::TcpStream, bytes: &[u8], opts: &DialOpts) -> Result<()> {
    tokio::select! {
        _ = opts.cancel.cancelled() => Err(ProbeError::Cancelled),
        out = tokio::time::timeout(opts.timeout, tcp.write_all(bytes)) => out
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|e| ProbeError::HandshakeFail(format!("shadowsocks header write: {e}"))),
    }
}

/// Seals one `len ‖ payload` chunk, bumping the nonce counter once per
/// AEAD operation.
fn seal_chunk(
    kind: AeadCipherKind,
    key: &[u8],
    nonce: &mut u64,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<()> {
    if payload.len() > MAX_CHUNK {
        return Err(ProbeError::internal("chunk exceeds 0x3fff"));
    }
    let len_bytes = (payload.len() as u16).to_be_bytes();
    out.extend_from_slice(&kind.seal(key, &counter_nonce(*nonce), &len_bytes)?);
    *nonce += 1;
    out.extend_from_slice(&kind.seal(key, &counter_nonce(*nonce), payload)?);
    *nonce += 1;
    Ok(())
}

enum ReadState {
    Salt { buf: Vec<u8>, pos: usize },
    Len { buf: [u8; 18], pos: usize },
    Data { buf: Vec<u8>, pos: usize },
    Eof,
}

/// AEAD-framed tunnel stream.
struct SsAeadStream<S> {
    inner: S,
    kind: AeadCipherKind,
    master_key: Vec<u8>,
    send_key: Vec<u8>,
    send_nonce: u64,
    recv_key: Vec<u8>,
    recv_nonce: u64,
    state: ReadState,
    plain: Vec<u8>,
    cursor: usize,
    pending: Option<WriteBuffer>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncRead for SsAeadStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if serve_buffered(&mut this.plain, &mut this.cursor, out) {
            return Poll::Ready(Ok(()));
        }
        loop {
            match &mut this.state {
                ReadState::Salt { buf, pos } => {
                    match poll_read_exact(&mut this.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            this.recv_key =
                                derive_subkey(&this.master_key, buf, this.kind.key_len());
                            this.state = ReadState::Len {
                                buf: [0u8; 18],
                                pos: 0,
                            };
                        }
                        Poll::Ready(Ok(false)) => {
                            this.state = ReadState::Eof;
                            return Poll::Ready(Ok(()));
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                ReadState::Len { buf, pos } => {
                    match poll_read_exact(&mut this.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            let sealed_len = 2 + this.kind.tag_len();
                            let opened = this
                                .kind
                                .open(
                                    &this.recv_key,
                                    &counter_nonce(this.recv_nonce),
                                    &buf[..sealed_len],
                                )
                                .map_err(to_io)?;
                            this.recv_nonce += 1;
                            let len = u16::from_be_bytes([opened[0], opened[1]]) as usize;
                            if len == 0 || len > MAX_CHUNK {
                                return Poll::Ready(Err(io::Error::other(
                                    "shadowsocks chunk length out of range",
                                )));
                            }
                            this.state = ReadState::Data {
                                buf: vec![0u8; len + this.kind.tag_len()],
                                pos: 0,
                            };
                        }
                        Poll::Ready(Ok(false)) => {
                            this.state = ReadState::Eof;
                            return Poll::Ready(Ok(()));
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                ReadState::Data { buf, pos } => {
                    match poll_read_exact(&mut this.inner, cx, buf, pos) {
                        Poll::Ready(Ok(true)) => {
                            let opened = this
                                .kind
                                .open(&this.recv_key, &counter_nonce(this.recv_nonce), buf)
                                .map_err(to_io)?;
                            this.recv_nonce += 1;
                            this.plain = opened;
                            this.cursor = 0;
                            this.state = ReadState::Len {
                                buf: [0u8; 18],
                                pos: 0,
                            };
                            if serve_buffered(&mut this.plain, &mut this.cursor, out) {
                                return Poll::Ready(Ok(()));
                            }
                        }
                        Poll::Ready(Ok(false)) => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof inside shadowsocks chunk",
                            )))
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                ReadState::Eof => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncWrite for SsAeadStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.pending.is_none() {
            let mut out = Vec::with_capacity(buf.len() + 64);
            for chunk in buf.chunks(MAX_CHUNK) {
                seal_chunk(this.kind, &this.send_key, &mut this.send_nonce, chunk, &mut out)
                    .map_err(to_io)?;
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

/// Legacy stream-cipher tunnel stream.
struct SsCipherStream<S> {
    inner: S,
    kind: StreamCipherKind,
    master_key: Vec<u8>,
    enc: StreamEncryptor,
    dec: Option<StreamDecryptor>,
    iv_buf: Vec<u8>,
    iv_pos: usize,
    pending: Option<WriteBuffer>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncRead for SsCipherStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.dec.is_none() {
            match poll_read_exact(&mut this.inner, cx, &mut this.iv_buf, &mut this.iv_pos) {
                Poll::Ready(Ok(true)) => {
                    this.dec = Some(this.kind.decryptor(&this.master_key, &this.iv_buf));
                }
                Poll::Ready(Ok(false)) => return Poll::Ready(Ok(())),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        let before = out.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, out) {
            Poll::Ready(Ok(())) => {
                let newly = &mut out.filled_mut()[before..];
                if let Some(dec) = this.dec.as_mut() {
                    dec.apply(newly);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncWrite for SsCipherStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.pending.is_none() {
            let mut data = buf.to_vec();
            this.enc.apply(&mut data);
            this.pending = Some(WriteBuffer::new(data, buf.len()));
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
