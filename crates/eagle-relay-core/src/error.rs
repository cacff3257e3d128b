//! Error types for the eagle-relay core.

use thiserror::Error;

/// Result type alias for eagle-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while relaying.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The handler already wrote its own response; the connection should end
    /// without relaying and without being reported.
    #[error("no need to continue")]
    NoNeedToContinue,

    /// Invalid EagleTunnel protocol data.
    #[error("Invalid EagleTunnel protocol: {0}")]
    InvalidEagleTunnelProtocol(String),

    /// Invalid SOCKS5 protocol data.
    #[error("Invalid SOCKS5 protocol: {0}")]
    InvalidSocks5Protocol(String),

    /// Invalid HTTP protocol data.
    #[error("Invalid HTTP protocol: {0}")]
    InvalidHttpProtocol(String),

    /// Authentication failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Connection refused by target.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection timeout.
    #[error("Connection timeout")]
    Timeout,

    /// Address resolution failed.
    #[error("Failed to resolve address: {0}")]
    AddressResolution(String),

    /// Unsupported proxy command.
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(u8),

    /// Unsupported address type.
    #[error("Unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    /// No upstream relayer address is configured.
    #[error("No relayer configured")]
    NoRelayer,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The relayer was already closed and cannot be started again.
    #[error("Relayer already closed")]
    RelayerClosed,
}

impl Error {
    /// Whether this is the completion sentinel rather than a real failure.
    pub fn is_completion(&self) -> bool {
        matches!(self, Error::NoNeedToContinue)
    }
}
