//! Poll-level helpers shared by the protocol stream wrappers.
//!
//! Every wrapper encodes a caller buffer into ciphertext once, then
//! drains it across however many `poll_write` calls the inner stream
//! needs; `WriteBuffer` carries that state. `poll_read_exact` fills a
//! fixed-size frame buffer across partial reads.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use rp_core::error::ProbeError;

/// Ciphertext pending on the wire for one caller write.
pub(crate) struct WriteBuffer {
    pub data: Vec<u8>,
    pub written: usize,
    /// Plaintext length to report once the ciphertext is flushed.
    pub original: usize,
}

impl WriteBuffer {
    pub fn new(data: Vec<u8>, original: usize) -> Self {
        Self {
            data,
            written: 0,
            original,
        }
    }
}

/// Drains `slot` into `inner`. Ready(n) with the original plaintext
/// length once everything is on the wire.
pub(crate) fn poll_drain<S: AsyncWrite + Unpin>(
    inner: &mut S,
    cx: &mut Context<'_>,
    slot: &mut Option<WriteBuffer>,
) -> Poll<io::Result<usize>> {
    let Some(wb) = slot.as_mut() else {
        return Poll::Ready(Err(io::Error::other("poll_drain without pending buffer")));
    };
    while wb.written < wb.data.len() {
        match Pin::new(&mut *inner).poll_write(cx, &wb.data[wb.written..]) {
            Poll::Ready(Ok(0)) => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "inner stream accepted zero bytes",
                )))
            }
            Poll::Ready(Ok(n)) => wb.written += n,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }
    }
    let n = wb.original;
    *slot = None;
    Poll::Ready(Ok(n))
}

/// Fills `buf[*pos..]` from `inner`. Ready(true) once full;
/// Ready(false) on clean EOF before the first byte of the frame.
pub(crate) fn poll_read_exact<S: AsyncRead + Unpin>(
    inner: &mut S,
    cx: &mut Context<'_>,
    buf: &mut [u8],
    pos: &mut usize,
) -> Poll<io::Result<bool>> {
    while *pos < buf.len() {
        let mut read_buf = ReadBuf::new(&mut buf[*pos..]);
        match Pin::new(&mut *inner).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                if n == 0 {
                    if *pos == 0 {
                        return Poll::Ready(Ok(false));
                    }
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "eof inside a frame",
                    )));
                }
                *pos += n;
            }
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }
    }
    Poll::Ready(Ok(true))
}

/// Serves buffered plaintext to the caller, advancing the cursor.
pub(crate) fn serve_buffered(
    plain: &mut Vec<u8>,
    cursor: &mut usize,
    out: &mut ReadBuf<'_>,
) -> bool {
    if *cursor < plain.len() {
        let n = (plain.len() - *cursor).min(out.remaining());
        out.put_slice(&plain[*cursor..*cursor + n]);
        *cursor += n;
        if *cursor >= plain.len() {
            plain.clear();
            *cursor = 0;
        }
        true
    } else {
        false
    }
}

pub(crate) fn to_io(err: ProbeError) -> io::Error {
    io::Error::other(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn drain_reports_original_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut slot = Some(WriteBuffer::new(vec![0xAB; 48], 10));
        let n = poll_fn(|cx| poll_drain(&mut client, cx, &mut slot))
            .await
            .unwrap();
        assert_eq!(n, 10);
        assert!(slot.is_none());
        let mut got = vec![0u8; 48];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(got, vec![0xAB; 48]);
    }

    #[tokio::test]
    async fn read_exact_detects_truncated_frames() {
        let (mut client, server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut server = server;
            server.write_all(&[1, 2, 3]).await.unwrap();
            // dropping the server ends the stream mid-frame
        });
        let mut frame = [0u8; 8];
        let mut pos = 0;
        let err = poll_fn(|cx| poll_read_exact(&mut client, cx, &mut frame, &mut pos))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn read_exact_reports_clean_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let mut frame = [0u8; 4];
        let mut pos = 0;
        let filled = poll_fn(|cx| poll_read_exact(&mut client, cx, &mut frame, &mut pos))
            .await
            .unwrap();
        assert!(!filled);
    }
}
