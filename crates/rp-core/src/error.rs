//! Unified error model for the probe engine.
//!
//! Every layer (link parsing, dialing, protocol handshakes, the probe
//! driver, the retry controller) reports one of the kinds below. Dialers
//! surface their most-specific kind and the retry controller preserves
//! the last underlying kind; nothing is collapsed into a catch-all on
//! the way up.

use thiserror::Error;

/// Probe error kinds, stable across the public API.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// A share link was structurally invalid.
    #[error("bad link: {0}")]
    BadLink(String),

    /// Dispatch found no connector for the option / network.
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),

    /// Hostname lookup failed.
    #[error("resolve failed: {0}")]
    ResolveFail(String),

    /// TCP connect to the relay failed.
    #[error("dial failed: {0}")]
    DialFail(String),

    /// TLS handshake with the relay failed.
    #[error("tls failed: {0}")]
    TlsFail(String),

    /// Protocol header exchange failed, including auth mismatch.
    #[error("handshake failed: {0}")]
    HandshakeFail(String),

    /// AEAD tag mismatch or stream decode error.
    #[error("crypto failed: {0}")]
    CryptoFail(String),

    /// The probe endpoint answered with a status other than 200/204.
    #[error("bad status: {0}")]
    BadStatus(String),

    /// The probe deadline was hit.
    #[error("timeout")]
    Timeout,

    /// External cancellation fired.
    #[error("cancelled")]
    Cancelled,

    /// Invariant violation; a bug, not an environment failure.
    #[error("internal: {0}")]
    Internal(String),
}

impl ProbeError {
    #[inline]
    #[must_use]
    pub fn bad_link(msg: impl Into<String>) -> Self {
        Self::BadLink(msg.into())
    }

    #[inline]
    #[must_use]
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::HandshakeFail(msg.into())
    }

    #[inline]
    #[must_use]
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::CryptoFail(msg.into())
    }

    #[inline]
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry round is worth another attempt.
    ///
    /// Parse and config errors fail identically on every attempt;
    /// everything touching the network may be transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::BadLink(_) | Self::UnsupportedConfig(_) | Self::Cancelled | Self::Internal(_)
        )
    }
}

impl Clone for ProbeError {
    fn clone(&self) -> Self {
        match self {
            Self::BadLink(s) => Self::BadLink(s.clone()),
            Self::UnsupportedConfig(s) => Self::UnsupportedConfig(s.clone()),
            Self::ResolveFail(s) => Self::ResolveFail(s.clone()),
            Self::DialFail(s) => Self::DialFail(s.clone()),
            Self::TlsFail(s) => Self::TlsFail(s.clone()),
            Self::HandshakeFail(s) => Self::HandshakeFail(s.clone()),
            Self::CryptoFail(s) => Self::CryptoFail(s.clone()),
            Self::BadStatus(s) => Self::BadStatus(s.clone()),
            Self::Timeout => Self::Timeout,
            Self::Cancelled => Self::Cancelled,
            Self::Internal(s) => Self::Internal(s.clone()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ProbeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Result alias used across the probe engine.
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;
