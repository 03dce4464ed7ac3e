//! The layered ShadowsocksR stream.
//!
//! Writes run payload → protocol → cipher (IV prefixed once) → obfs;
//! reads run obfs → cipher (server IV consumed first) → protocol. An
//! obfs plugin may owe the server a reply after a decode (the faked-TLS
//! finished flight); that reply is flushed from the read path before
//! any further reads.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use rp_core::crypto::stream::{StreamCipherKind, StreamDecryptor, StreamEncryptor};

use super::obfs::SsrObfs;
use super::protocol::SsrProtocol;
use crate::outbound::iohelper::{poll_drain, serve_buffered, to_io, WriteBuffer};

pub(crate) struct SsrStream<S> {
    inner: S,
    kind: StreamCipherKind,
    master_key: Vec<u8>,
    enc: StreamEncryptor,
    send_iv: Vec<u8>,
    iv_sent: bool,
    dec: Option<StreamDecryptor>,
    recv_iv: Vec<u8>,
    protocol: Box<dyn SsrProtocol>,
    obfs: Box<dyn SsrObfs>,
    /// Encoded destination address, prepended to the first write.
    head: Option<Vec<u8>>,
    plain: Vec<u8>,
    cursor: usize,
    pending: Option<WriteBuffer>,
    obfs_reply: Option<WriteBuffer>,
}

impl<S> SsrStream<S> {
    pub fn new(
        inner: S,
        kind: StreamCipherKind,
        master_key: Vec<u8>,
        send_iv: Vec<u8>,
        protocol: Box<dyn SsrProtocol>,
        obfs: Box<dyn SsrObfs>,
        head: Vec<u8>,
    ) -> Self {
        let enc = kind.encryptor(&master_key, &send_iv);
        let dec = (kind.iv_len() == 0).then(|| kind.decryptor(&master_key, &[]));
        Self {
            inner,
            kind,
            master_key,
            enc,
            send_iv,
            iv_sent: false,
            dec,
            recv_iv: Vec::new(),
            protocol,
            obfs,
            head: Some(head),
            plain: Vec::new(),
            cursor: 0,
            pending: None,
            obfs_reply: None,
        }
    }

    /// obfs → cipher → protocol for one slab of wire bytes.
    fn decode_incoming(&mut self, data: &[u8]) -> io::Result<()> {
        let mut deobfs = self.obfs.decode(data).map_err(to_io)?;
        if let Some(reply) = self.obfs.take_pending_reply() {
            self.obfs_reply = Some(WriteBuffer::new(reply, 0));
        }
        if deobfs.is_empty() {
            return Ok(());
        }

        let mut offset = 0;
        if self.dec.is_none() {
            let need = self.kind.iv_len() - self.recv_iv.len();
            let take = need.min(deobfs.len());
            self.recv_iv.extend_from_slice(&deobfs[..take]);
            offset = take;
            if self.recv_iv.len() == self.kind.iv_len() {
                self.dec = Some(self.kind.decryptor(&self.master_key, &self.recv_iv));
            }
        }
        if offset >= deobfs.len() {
            return Ok(());
        }

        let body = &mut deobfs[offset..];
        self.dec
            .as_mut()
            .expect("decryptor exists once the iv is consumed")
            .apply(body);
        let plain = self.protocol.post_decrypt(body).map_err(to_io)?;
        self.plain.extend_from_slice(&plain);
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncRead for SsrStream<S> {
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
            // Settle any reply the obfs layer owes before reading on.
            if this.obfs_reply.is_some() {
                match poll_drain(&mut this.inner, cx, &mut this.obfs_reply) {
                    Poll::Ready(Ok(_)) => {}
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            let mut tmp = [0u8; 4096];
            let mut read_buf = ReadBuf::new(&mut tmp);
            match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = read_buf.filled();
                    if filled.is_empty() {
                        return Poll::Ready(Ok(()));
                    }
                    this.decode_incoming(filled)?;
                    if serve_buffered(&mut this.plain, &mut this.cursor, out) {
                        return Poll::Ready(Ok(()));
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncWrite for SsrStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.pending.is_none() {
            let payload = match this.head.take() {
                Some(mut head) => {
                    head.extend_from_slice(buf);
                    head
                }
                None => buf.to_vec(),
            };
            let mut ciphertext = this.protocol.pre_encrypt(&payload).map_err(to_io)?;
            this.enc.apply(&mut ciphertext);

            let framed = if this.iv_sent {
                ciphertext
            } else {
                this.iv_sent = true;
                let mut framed = this.send_iv.clone();
                framed.extend_from_slice(&ciphertext);
                framed
            };
            let wire = this.obfs.encode(&framed).map_err(to_io)?;
            this.pending = Some(WriteBuffer::new(wire, buf.len()));
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
