//! Dialer abstraction over plain and layered transports.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced while establishing a transport-level connection.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls: {0}")]
    Tls(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("other: {0}")]
    Other(String),
}

impl From<tokio::time::error::Elapsed> for DialError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DialError::Timeout
    }
}

/// Marker trait for duplex async streams that can cross await points.
pub trait AsyncReadWrite: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

impl<T> AsyncReadWrite for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

/// Type-erased duplex stream handed between transport layers.
pub type IoStream = Box<dyn AsyncReadWrite>;

/// Asynchronous connection establishment to `host:port`.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<IoStream, DialError>;
}

/// Plain TCP dialer on the system stack.
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn connect(&self, host: &str, port: u16) -> Result<IoStream, DialError> {
        let stream = tokio::net::TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tcp_dialer_reaches_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut b = [0u8; 4];
            conn.read_exact(&mut b).await.unwrap();
            conn.write_all(&b).await.unwrap();
        });

        let mut stream = TcpDialer
            .connect("127.0.0.1", addr.port())
            .await
            .expect("connect loopback");
        stream.write_all(b"ping").await.unwrap();
        let mut back = [0u8; 4];
        stream.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"ping");
    }

    #[tokio::test]
    async fn refused_port_maps_to_io() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = TcpDialer.connect("127.0.0.1", addr.port()).await;
        assert!(matches!(err, Err(DialError::Io(_))));
    }
}
