//! Credentials: passwords held only for the duration of an operation.
//!
//! A [`Credential`] is never persisted and never printed. It is the only
//! thing that can unlock a user's wrapped private key.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::error::ValidationError;

/// Minimum password length for a user account.
pub const USER_MIN_PASSWORD_LEN: usize = 8;

/// Maximum password length for a user account.
pub const USER_MAX_PASSWORD_LEN: usize = 32;

/// Minimum password length accepted by a raw vault re-wrap.
pub const REWRAP_MIN_PASSWORD_LEN: usize = 4;

/// A password supplied by the caller.
pub struct Credential(SecretString);

impl Credential {
    /// Wrap a password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(SecretString::from(password.into()))
    }

    /// Number of characters in the password.
    pub fn len(&self) -> usize {
        self.0.expose_secret().chars().count()
    }

    /// Whether the password is empty.
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    /// Check presence and the `min..=max` character bounds.
    pub fn validate_length(&self, min: usize, max: usize) -> Result<(), ValidationError> {
        let actual = self.len();
        if actual == 0 {
            return Err(ValidationError::PasswordMissing);
        }
        if actual < min {
            return Err(ValidationError::PasswordTooShort { min, actual });
        }
        if actual > max {
            return Err(ValidationError::PasswordTooLong { max, actual });
        }
        Ok(())
    }

    /// Check the bounds that apply to user account passwords.
    pub fn validate_for_user(&self) -> Result<(), ValidationError> {
        self.validate_length(USER_MIN_PASSWORD_LEN, USER_MAX_PASSWORD_LEN)
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<&str> for Credential {
    fn from(password: &str) -> Self {
        Self::new(password)
    }
}

impl From<String> for Credential {
    fn from(password: String) -> Self {
        Self::new(password)
    }
}
