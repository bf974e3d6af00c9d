//! Sealed item secrets.
//!
//! An item secret is sealed to its group's public key: a fresh ephemeral
//! X25519 key agrees with the group key, and the derived key (bound to the
//! item id) encrypts the plaintext. Sealing needs no private key, so anyone
//! can write a secret. Only current group members can read it.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use tarkin_core::{EncryptionNonce, EphemeralKeyPair, ItemId, PublicKey, SecretKey};

use crate::error::{PermsError, Result};

const SEAL_DOMAIN: &str = "tarkin 2026-01 item secret v1";

/// Format identifier for sealed secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SealFormat {
    /// X25519 ephemeral-static agreement, BLAKE3 key derivation,
    /// ChaCha20-Poly1305.
    X25519ChaCha20Poly1305 = 1,
}

/// An item secret sealed to a group public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub format: SealFormat,

    /// Ephemeral X25519 public key.
    pub ephemeral_public: PublicKey,

    /// Nonce used for encryption (unique per seal).
    pub nonce: EncryptionNonce,

    /// The encrypted secret (includes authentication tag).
    pub ciphertext: Vec<u8>,
}

impl SealedSecret {
    /// Seal `plaintext` for the holder of `group_public`'s secret key.
    pub fn seal(item_id: ItemId, plaintext: &[u8], group_public: &PublicKey) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(group_public);
        let key = shared.derive_encryption_key(SEAL_DOMAIN, item_id.as_bytes());

        let nonce = EncryptionNonce::generate();
        let ciphertext = key
            .encrypt(plaintext, &nonce)
            .map_err(|e| PermsError::Encryption(e.to_string()))?;

        Ok(Self {
            format: SealFormat::X25519ChaCha20Poly1305,
            ephemeral_public,
            nonce,
            ciphertext,
        })
    }

    /// Open with the group secret key. Fails if the secret was sealed for
    /// another item or another key.
    pub fn open(&self, item_id: ItemId, group_secret: &SecretKey) -> Result<Zeroizing<Vec<u8>>> {
        match self.format {
            SealFormat::X25519ChaCha20Poly1305 => {
                let shared = group_secret.diffie_hellman(&self.ephemeral_public);
                let key = shared.derive_encryption_key(SEAL_DOMAIN, item_id.as_bytes());
                key.decrypt(&self.ciphertext, &self.nonce)
                    .map(Zeroizing::new)
                    .map_err(|e| PermsError::Decryption(e.to_string()))
            }
        }
    }

    /// Open and decode as UTF-8.
    pub fn open_string(&self, item_id: ItemId, group_secret: &SecretKey) -> Result<String> {
        let bytes = self.open(item_id, group_secret)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| PermsError::Decryption("secret is not valid UTF-8".into()))
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let group = SecretKey::generate();
        let item = ItemId::generate();

        let sealed = SealedSecret::seal(item, b"hunter2", &group.public_key()).unwrap();
        let opened = sealed.open(item, &group).unwrap();

        assert_eq!(opened.as_slice(), b"hunter2");
    }

    #[test]
    fn test_wrong_key_fails() {
        let group = SecretKey::generate();
        let item = ItemId::generate();
        let sealed = SealedSecret::seal(item, b"secret", &group.public_key()).unwrap();

        assert!(matches!(
            sealed.open(item, &SecretKey::generate()),
            Err(PermsError::Decryption(_))
        ));
    }

    #[test]
    fn test_bound_to_item() {
        let group = SecretKey::generate();
        let sealed =
            SealedSecret::seal(ItemId::generate(), b"secret", &group.public_key()).unwrap();

        assert!(sealed.open(ItemId::generate(), &group).is_err());
    }

    #[test]
    fn test_resealing_changes_ciphertext() {
        let group = SecretKey::generate();
        let item = ItemId::generate();

        let a = SealedSecret::seal(item, b"same", &group.public_key()).unwrap();
        let b = SealedSecret::seal(item, b"same", &group.public_key()).unwrap();

        assert_ne!(a.ephemeral_public, b.ephemeral_public);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_open_string_rejects_invalid_utf8() {
        let group = SecretKey::generate();
        let item = ItemId::generate();
        let sealed = SealedSecret::seal(item, &[0xff, 0xfe], &group.public_key()).unwrap();

        assert!(sealed.open_string(item, &group).is_err());
    }

    #[test]
    fn test_sealed_serialization() {
        let group = SecretKey::generate();
        let sealed =
            SealedSecret::seal(ItemId::generate(), b"test", &group.public_key()).unwrap();

        let bytes = sealed.to_bytes().unwrap();
        assert_eq!(SealedSecret::from_bytes(&bytes).unwrap(), sealed);
    }
}
