//! Error types for the permissions crate.

use thiserror::Error;

/// Errors that can occur while sharing keys or sealing secrets.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Encryption error.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption error: wrong key, tampered ciphertext, or a blob bound to
    /// a different record.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] tarkin_core::CoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
