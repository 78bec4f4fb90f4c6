//! Structured error kinds for the clipboard-bridge core.
//!
//! Each variant corresponds to one row of the error taxonomy: where it is
//! raised, and what propagates from it, is documented at the call site
//! rather than here. Components that need to bubble arbitrary failures
//! (file I/O, serde) still use `anyhow::Error`; `ClipError` is reserved for
//! the kinds the sync engine and callers branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("QR payload malformed: {0}")]
    QrMalformed(String),

    #[error("peer unreachable at {0}")]
    Unreachable(String),

    #[error("certificate untrusted: {0}")]
    CertUntrusted(String),

    #[error("session key wrap failed: {0}")]
    WrapFail(String),

    #[error("session key unwrap failed: {0}")]
    UnwrapFail(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("decrypt/authentication failed")]
    DecryptAuth,

    #[error("send failed: {0}")]
    SendFail(String),

    #[error("stored content could not be decrypted")]
    StoreDecrypt,

    #[error("transient network error: {0}")]
    TransientNet(String),

    #[error("content type unsupported on this transport")]
    ContentUnsupported,
}

pub type ClipResult<T> = Result<T, ClipError>;
