//! The probe driver: one canned HTTP request through an established
//! tunnel, one short read, one status line.

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{ProbeError, Result};

/// Hard deadline covering write + read of one probe exchange. The same
/// budget bounds dial + handshake at the dispatch layer.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(2400);

/// Probe endpoint: the tunnel is asked to reach this host and port.
pub const PROBE_HOST: &str = "clients3.google.com";
pub const PROBE_PORT: u16 = 80;

/// The exact request bytes sent through every tunnel.
pub const PROBE_REQUEST: &[u8] = b"GET /generate_204 HTTP/1.1\r\nHost: clients3.google.com\r\nUser-Agent: Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/85.0.4183.121 Safari/537.36\r\n\r\n";

const READ_BUF_LEN: usize = 128;

/// Sends the probe request over `conn` and returns the elapsed
/// milliseconds once an acceptable status line came back. The stream is
/// owned and dropped (closed) on every exit path.
pub async fn probe_stream<S>(mut conn: S) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let fut = async {
        let start = Instant::now();
        conn.write_all(PROBE_REQUEST)
            .await
            .map_err(|e| map_io_error("probe write", e))?;
        conn.flush()
            .await
            .map_err(|e| map_io_error("probe flush", e))?;

        let mut buf = [0u8; READ_BUF_LEN];
        let n = conn
            .read(&mut buf)
            .await
            .map_err(|e| map_io_error("probe read", e))?;

        let status = parse_first_line(&buf[..n])?;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(status, elapsed_ms = elapsed, "probe round-trip complete");
        Ok(elapsed.max(1))
    };

    tokio::time::timeout(PROBE_TIMEOUT, fut)
        .await
        .map_err(ProbeError::from)?
}

/// Tunnel streams report protocol failures as `io::Error`s wrapping a
/// `ProbeError`; unwrap those so handshake and crypto kinds survive the
/// trip through the stream traits.
fn map_io_error(stage: &str, err: std::io::Error) -> ProbeError {
    if let Some(inner) = err.get_ref().and_then(|r| r.downcast_ref::<ProbeError>()) {
        return inner.clone();
    }
    ProbeError::DialFail(format!("{stage}: {err}"))
}

/// Parses the status code out of the first non-empty line of an HTTP
/// response. Accepts 200 and 204; everything else, including any
/// structural problem, is a status failure.
pub fn parse_first_line(buf: &[u8]) -> Result<u16> {
    let mut rest = buf;
    let mut line: &[u8] = &[];
    while line.is_empty() {
        (line, rest) = next_line(rest)?;
    }

    // Skip the protocol token.
    let space = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ProbeError::BadStatus("no space in status line".into()))?;
    let after_proto = &line[space + 1..];

    let (status, used) = parse_uint(after_proto)?;
    if after_proto.len() > used && after_proto[used] != b' ' {
        return Err(ProbeError::BadStatus(
            "unexpected byte after status code".into(),
        ));
    }

    if status == 200 || status == 204 {
        Ok(status as u16)
    } else {
        Err(ProbeError::BadStatus(format!("status {status}")))
    }
}

/// Splits off the next line, tolerating both `\r\n` and bare `\n`.
fn next_line(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let lf = buf
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ProbeError::BadStatus("need more data: no trailing lf".into()))?;
    let mut end = lf;
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }
    Ok((&buf[..end], &buf[lf + 1..]))
}

/// Parses a leading ASCII decimal integer, rejecting non-digit leads
/// and overflow, returning the value and the number of bytes consumed.
fn parse_uint(buf: &[u8]) -> Result<(u64, usize)> {
    if buf.is_empty() {
        return Err(ProbeError::BadStatus("empty status integer".into()));
    }
    let mut value: u64 = 0;
    for (i, &c) in buf.iter().enumerate() {
        if !c.is_ascii_digit() {
            if i == 0 {
                return Err(ProbeError::BadStatus(
                    "status code does not start with a digit".into(),
                ));
            }
            return Ok((value, i));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(c - b'0')))
            .ok_or_else(|| ProbeError::BadStatus("status integer overflow".into()))?;
    }
    Ok((value, buf.len()))
}
