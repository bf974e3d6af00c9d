//! The key pair vault: password-protected X25519 private keys.
//!
//! A user's private key is stored only as a [`WrappedPrivateKey`]: the 32
//! secret bytes encrypted with ChaCha20-Poly1305 under a key derived from
//! the user's password by Argon2id. The blob carries its own KDF parameters
//! and salt, so parameters can be raised later without breaking old blobs.
//!
//! ```text
//! password ──Argon2id(salt, params)──▶ wrapping key
//! wrapping key ──ChaCha20-Poly1305(nonce)──▶ ciphertext(secret key)
//! ```
//!
//! Losing the password loses the key. There is no recovery path.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::credential::{Credential, REWRAP_MIN_PASSWORD_LEN};
use crate::crypto::{EncryptionKey, EncryptionNonce, PublicKey, SecretKey};
use crate::error::{CoreError, ValidationError};

/// Current wrapped key format.
pub const WRAP_VERSION: u8 = 1;

/// Salt length for the password KDF.
pub const SALT_LEN: usize = 16;

/// Upper bound on the memory cost accepted from a stored blob (1 GiB).
const MAX_MEM_COST_KIB: u32 = 1 << 20;

/// Upper bound on the iteration count accepted from a stored blob.
const MAX_TIME_COST: u32 = 64;

/// Argon2id parameters for the password KDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_cost_kib: u32,
    /// Time cost / iterations.
    pub time_cost: u32,
    /// Parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// OWASP baseline for Argon2id: 19 MiB, 2 iterations, 1 lane.
    fn default() -> Self {
        Self {
            mem_cost_kib: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal parameters for tests. Never use these for real accounts.
    pub const fn insecure_fast() -> Self {
        Self {
            mem_cost_kib: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Params, CoreError> {
        if self.mem_cost_kib > MAX_MEM_COST_KIB {
            return Err(CoreError::KeyDerivation(format!(
                "memory cost {} KiB exceeds limit",
                self.mem_cost_kib
            )));
        }
        if self.time_cost > MAX_TIME_COST {
            return Err(CoreError::KeyDerivation(format!(
                "time cost {} exceeds limit",
                self.time_cost
            )));
        }
        Params::new(self.mem_cost_kib, self.time_cost, self.parallelism, Some(32))
            .map_err(|e| CoreError::KeyDerivation(format!("invalid Argon2id params: {e}")))
    }
}

/// A private key encrypted under a password-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedPrivateKey {
    /// Format version, see [`WRAP_VERSION`].
    pub version: u8,
    /// KDF parameters used to derive the wrapping key.
    pub kdf: KdfParams,
    /// KDF salt (not secret).
    pub salt: [u8; SALT_LEN],
    /// Nonce used for encryption.
    pub nonce: EncryptionNonce,
    /// The encrypted secret key (includes authentication tag).
    pub ciphertext: Vec<u8>,
}

impl WrappedPrivateKey {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Generate a fresh key pair and wrap its private half under `credential`.
pub fn generate(
    credential: &Credential,
    kdf: &KdfParams,
) -> Result<(PublicKey, WrappedPrivateKey), CoreError> {
    let secret = SecretKey::generate();
    let wrapped = wrap(&secret, credential, kdf)?;
    Ok((secret.public_key(), wrapped))
}

/// Wrap `secret` under `credential` with a fresh salt and nonce.
pub fn wrap(
    secret: &SecretKey,
    credential: &Credential,
    kdf: &KdfParams,
) -> Result<WrappedPrivateKey, CoreError> {
    if credential.is_empty() {
        return Err(ValidationError::PasswordMissing.into());
    }

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = derive_wrapping_key(credential, &salt, kdf)?;
    let nonce = EncryptionNonce::generate();
    let secret_bytes = secret.to_bytes();
    let ciphertext = key.encrypt(&secret_bytes[..], &nonce)?;

    Ok(WrappedPrivateKey {
        version: WRAP_VERSION,
        kdf: *kdf,
        salt,
        nonce,
        ciphertext,
    })
}

/// Recover the private key from `wrapped`.
///
/// Every failure is [`CoreError::WrongPassword`]: a missing password, a
/// wrong one, and a corrupt blob are indistinguishable to the caller.
pub fn unwrap(
    wrapped: &WrappedPrivateKey,
    credential: Option<&Credential>,
) -> Result<SecretKey, CoreError> {
    let credential =
        credential.ok_or_else(|| CoreError::WrongPassword("no password given".into()))?;

    if wrapped.version != WRAP_VERSION {
        return Err(CoreError::WrongPassword(format!(
            "unsupported key format {}",
            wrapped.version
        )));
    }

    let key = derive_wrapping_key(credential, &wrapped.salt, &wrapped.kdf)
        .map_err(|_| CoreError::WrongPassword("unreadable key parameters".into()))?;

    let plaintext = Zeroizing::new(
        key.decrypt(&wrapped.ciphertext, &wrapped.nonce)
            .map_err(|_| CoreError::WrongPassword("can't decrypt private key".into()))?,
    );

    let bytes: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CoreError::WrongPassword("malformed private key".into()))?;

    Ok(SecretKey::from_bytes(bytes))
}

/// Re-wrap an already unlocked key under a new password.
///
/// The key pair is not regenerated: the public key stays bit-identical.
/// Accepts passwords of [`REWRAP_MIN_PASSWORD_LEN`] characters or more;
/// user accounts apply their own, higher floor before calling this.
pub fn rewrap(
    secret: &SecretKey,
    new_credential: &Credential,
    kdf: &KdfParams,
) -> Result<WrappedPrivateKey, CoreError> {
    new_credential.validate_length(REWRAP_MIN_PASSWORD_LEN, usize::MAX)?;
    wrap(secret, new_credential, kdf)
}

fn derive_wrapping_key(
    credential: &Credential,
    salt: &[u8; SALT_LEN],
    kdf: &KdfParams,
) -> Result<EncryptionKey, CoreError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, kdf.to_argon2()?);

    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(credential.expose().as_bytes(), salt, &mut out[..])
        .map_err(|e| CoreError::KeyDerivation(format!("Argon2id KDF failed: {e}")))?;

    Ok(EncryptionKey::from_bytes(*out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams::insecure_fast();

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let password = Credential::new("password");
        let (public, wrapped) = generate(&password, &FAST).unwrap();

        let secret = unwrap(&wrapped, Some(&password)).unwrap();
        assert_eq!(secret.public_key(), public);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let (_, wrapped) = generate(&Credential::new("password"), &FAST).unwrap();

        let err = unwrap(&wrapped, Some(&Credential::new("wrong"))).unwrap_err();
        assert!(matches!(err, CoreError::WrongPassword(_)));
    }

    #[test]
    fn test_missing_password_rejected() {
        let (_, wrapped) = generate(&Credential::new("password"), &FAST).unwrap();

        let err = unwrap(&wrapped, None).unwrap_err();
        assert!(matches!(err, CoreError::WrongPassword(_)));
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let password = Credential::new("password");
        let (_, mut wrapped) = generate(&password, &FAST).unwrap();
        wrapped.ciphertext[0] ^= 0x01;

        let err = unwrap(&wrapped, Some(&password)).unwrap_err();
        assert!(matches!(err, CoreError::WrongPassword(_)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let password = Credential::new("password");
        let (_, mut wrapped) = generate(&password, &FAST).unwrap();
        wrapped.version = 9;

        assert!(matches!(
            unwrap(&wrapped, Some(&password)),
            Err(CoreError::WrongPassword(_))
        ));
    }

    #[test]
    fn test_oversized_kdf_params_rejected() {
        let password = Credential::new("password");
        let (_, mut wrapped) = generate(&password, &FAST).unwrap();
        wrapped.kdf.mem_cost_kib = u32::MAX;

        assert!(matches!(
            unwrap(&wrapped, Some(&password)),
            Err(CoreError::WrongPassword(_))
        ));
    }

    #[test]
    fn test_oversized_time_cost_rejected() {
        let password = Credential::new("password");
        let (_, mut wrapped) = generate(&password, &FAST).unwrap();
        wrapped.kdf.time_cost = u32::MAX;

        assert!(matches!(
            unwrap(&wrapped, Some(&password)),
            Err(CoreError::WrongPassword(_))
        ));
    }

    #[test]
    fn test_rewrap_rotates_password() {
        let old = Credential::new("old password");
        let new = Credential::new("new password");
        let (public, wrapped) = generate(&old, &FAST).unwrap();

        let secret = unwrap(&wrapped, Some(&old)).unwrap();
        let rewrapped = rewrap(&secret, &new, &FAST).unwrap();

        assert!(unwrap(&rewrapped, Some(&old)).is_err());
        let recovered = unwrap(&rewrapped, Some(&new)).unwrap();
        assert_eq!(recovered.public_key(), public);
    }

    #[test]
    fn test_rewrap_floor_is_four_characters() {
        let secret = SecretKey::generate();

        assert!(matches!(
            rewrap(&secret, &Credential::new("abc"), &FAST),
            Err(CoreError::Validation(ValidationError::PasswordTooShort { min: 4, actual: 3 }))
        ));
        assert!(rewrap(&secret, &Credential::new("abcd"), &FAST).is_ok());
    }

    #[test]
    fn test_empty_password_cannot_wrap() {
        assert!(matches!(
            generate(&Credential::new(""), &FAST),
            Err(CoreError::Validation(ValidationError::PasswordMissing))
        ));
    }

    #[test]
    fn test_same_password_different_salt() {
        let password = Credential::new("password");
        let (_, a) = generate(&password, &FAST).unwrap();
        let (_, b) = generate(&password, &FAST).unwrap();
        assert_ne!(a.salt, b.salt);
    }

    #[test]
    fn test_blob_serialization() {
        let (_, wrapped) = generate(&Credential::new("password"), &FAST).unwrap();
        let bytes = wrapped.to_bytes().unwrap();
        assert_eq!(WrappedPrivateKey::from_bytes(&bytes).unwrap(), wrapped);
    }

    #[test]
    fn test_garbage_bytes_do_not_parse() {
        assert!(WrappedPrivateKey::from_bytes(b"not cbor at all").is_err());
    }
}
