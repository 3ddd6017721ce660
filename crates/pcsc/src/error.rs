//! Error types for PC/SC sessions

use std::sync::Arc;

/// Layer an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorOrigin {
    /// The underlying smart-card service or reader driver.
    Service,
    /// The binding between this crate and the service (handles, names, capabilities).
    Binding,
    /// The operating system (threads, I/O).
    Platform,
    /// The caller used the API in a way it does not allow.
    Misuse,
}

/// PC/SC session errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PcscError {
    /// Error reported by the native PC/SC service
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// Error reported by a non-native card service
    #[error("{code}: {message}")]
    Service {
        /// Service-defined error code
        code: String,
        /// Human-readable description
        message: String,
    },

    /// Operating system error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// Reader name cannot be passed to the service
    #[error("Invalid reader name: {0:?}")]
    InvalidReaderName(String),

    /// The card handle is gone (its worker exited or the service was torn down)
    #[error("Card handle closed")]
    HandleClosed,

    /// Attribute not supported by this binding
    #[error("Unsupported attribute: {0:#010x}")]
    UnsupportedAttribute(u32),

    /// Operation not supported by this binding
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Card was used after `disconnect`
    #[error("Card has been disconnected")]
    Disconnected,

    /// Reader was used after its `disconnect` event
    #[error("Reader has been disconnected: {0}")]
    ReaderDisconnected(String),

    /// Transaction already in progress
    #[error("Transaction already in progress")]
    TransactionInProgress,

    /// No active transaction
    #[error("No active transaction")]
    NoTransaction,

    /// `Protocol::Unset` requested outside of `CardMode::Direct`
    #[error("Protocol UNSET is only valid with DIRECT mode")]
    UnsetProtocol,

    /// Client monitoring already running
    #[error("Client is already running")]
    AlreadyRunning,
}

impl From<std::io::Error> for PcscError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl PcscError {
    /// Build an error reported by a non-native card service.
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Layer this error originated from.
    pub const fn origin(&self) -> ErrorOrigin {
        match self {
            Self::Pcsc(_) | Self::Service { .. } => ErrorOrigin::Service,
            Self::Io(_) => ErrorOrigin::Platform,
            Self::ReaderNotFound(_)
            | Self::InvalidReaderName(_)
            | Self::HandleClosed
            | Self::UnsupportedAttribute(_)
            | Self::Unsupported(_) => ErrorOrigin::Binding,
            Self::Disconnected
            | Self::ReaderDisconnected(_)
            | Self::TransactionInProgress
            | Self::NoTransaction
            | Self::UnsetProtocol
            | Self::AlreadyRunning => ErrorOrigin::Misuse,
        }
    }

    /// `true` for errors caused by API misuse rather than the service.
    pub const fn is_misuse(&self) -> bool {
        matches!(self.origin(), ErrorOrigin::Misuse)
    }

    /// Stable error code, suitable for logs and matching.
    pub fn code(&self) -> String {
        match self {
            Self::Pcsc(e) => format!("PCSC_{}", screaming_snake(&format!("{:?}", e))),
            Self::Service { code, .. } => code.clone(),
            Self::Io(e) => format!("IO_{}", screaming_snake(&format!("{:?}", e.kind()))),
            Self::ReaderNotFound(_) => "ERR_READER_NOT_FOUND".into(),
            Self::InvalidReaderName(_) => "ERR_INVALID_READER_NAME".into(),
            Self::HandleClosed => "ERR_HANDLE_CLOSED".into(),
            Self::UnsupportedAttribute(_) => "ERR_UNSUPPORTED_ATTRIBUTE".into(),
            Self::Unsupported(_) => "ERR_UNSUPPORTED".into(),
            Self::Disconnected => "ERR_DISCONNECTED".into(),
            Self::ReaderDisconnected(_) => "ERR_READER_DISCONNECTED".into(),
            Self::TransactionInProgress => "ERR_TRANSACTION_IN_PROGRESS".into(),
            Self::NoTransaction => "ERR_NO_TRANSACTION".into(),
            Self::UnsetProtocol => "ERR_UNSET_PROTOCOL".into(),
            Self::AlreadyRunning => "ERR_ALREADY_RUNNING".into(),
        }
    }
}

/// `NoSmartcard` -> `NO_SMARTCARD`
fn screaming_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_and_code() {
        let err = PcscError::from(pcsc::Error::NoSmartcard);
        assert_eq!(err.origin(), ErrorOrigin::Service);
        assert_eq!(err.code(), "PCSC_NO_SMARTCARD");
        assert!(!err.is_misuse());

        let err = PcscError::TransactionInProgress;
        assert!(err.is_misuse());
        assert_eq!(err.code(), "ERR_TRANSACTION_IN_PROGRESS");

        let err = PcscError::service("E_BUSY", "reader busy");
        assert_eq!(err.origin(), ErrorOrigin::Service);
        assert_eq!(err.to_string(), "E_BUSY: reader busy");

        let err = PcscError::from(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert_eq!(err.origin(), ErrorOrigin::Platform);
        assert_eq!(err.code(), "IO_WOULD_BLOCK");
    }
}
