//! Error types for Tarkin Core.

use thiserror::Error;

/// Cryptographic errors.
///
/// Messages never contain key material or passwords, only the name of the
/// principal or the operation that failed.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Password absent, incorrect, or the wrapped key blob is unreadable.
    #[error("wrong password: {0}")]
    WrongPassword(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Entity invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name can't be blank")]
    NameMissing,

    #[error("name is too long (maximum is {max} characters)")]
    NameTooLong { max: usize },

    #[error("email can't be blank")]
    EmailMissing,

    #[error("email is invalid")]
    EmailInvalid,

    #[error("email has already been taken")]
    EmailTaken,

    #[error("password can't be blank")]
    PasswordMissing,

    #[error("password is too short (minimum is {min} characters, got {actual})")]
    PasswordTooShort { min: usize, actual: usize },

    #[error("password is too long (maximum is {max} characters, got {actual})")]
    PasswordTooLong { max: usize, actual: usize },

    #[error("directory name is invalid: {0}")]
    DirectoryNameInvalid(String),

    #[error("directory {0} already exists here")]
    DirectoryNameTaken(String),

    #[error("directory is not empty")]
    DirectoryNotEmpty,

    #[error("the root directory can't be changed")]
    RootDirectory,

    #[error("a group must keep at least one member")]
    LastMember,
}
