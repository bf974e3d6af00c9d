//! Member key shares via X25519 key agreement.
//!
//! A group's private key is stored once per member, wrapped for that
//! member's public key. Granting membership means opening one's own share
//! and creating a new one for the target.
//!
//! The wrapping key is bound to the group, the member and the key epoch, so
//! a share copied onto another membership edge does not open.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use tarkin_core::{
    EncryptionNonce, EphemeralKeyPair, GroupId, PublicKey, SecretKey, UserId,
};

use crate::error::{PermsError, Result};

const SHARE_DOMAIN: &str = "tarkin 2026-01 member key share v1";

/// Current share format.
pub const SHARE_VERSION: u8 = 1;

/// A group private key wrapped for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberKeyShare {
    /// Format version, see [`SHARE_VERSION`].
    pub version: u8,

    /// The group whose key this is.
    pub group_id: GroupId,

    /// The member this share is for.
    pub user_id: UserId,

    /// Group key generation.
    pub key_epoch: u32,

    /// Ephemeral X25519 public key (sender's side of ECDH).
    pub ephemeral_public: PublicKey,

    /// Nonce used for encryption.
    pub nonce: EncryptionNonce,

    /// The group secret key, encrypted with the derived shared secret.
    pub encrypted_key: Vec<u8>,
}

impl MemberKeyShare {
    /// Wrap `group_secret` for the member with `member_public`.
    pub fn create(
        group_id: GroupId,
        user_id: UserId,
        key_epoch: u32,
        group_secret: &SecretKey,
        member_public: &PublicKey,
    ) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(member_public);

        let wrap_key =
            shared.derive_encryption_key(SHARE_DOMAIN, &context(group_id, user_id, key_epoch));

        let nonce = EncryptionNonce::generate();
        let secret_bytes = group_secret.to_bytes();
        let encrypted_key = wrap_key
            .encrypt(&secret_bytes[..], &nonce)
            .map_err(|e| PermsError::Encryption(e.to_string()))?;

        Ok(Self {
            version: SHARE_VERSION,
            group_id,
            user_id,
            key_epoch,
            ephemeral_public,
            nonce,
            encrypted_key,
        })
    }

    /// Recover the group secret key with the member's secret key.
    pub fn open(&self, member_secret: &SecretKey) -> Result<SecretKey> {
        if self.version != SHARE_VERSION {
            return Err(PermsError::Decryption(format!(
                "unsupported share format {}",
                self.version
            )));
        }

        let shared = member_secret.diffie_hellman(&self.ephemeral_public);
        let wrap_key = shared.derive_encryption_key(
            SHARE_DOMAIN,
            &context(self.group_id, self.user_id, self.key_epoch),
        );

        let key_bytes = Zeroizing::new(
            wrap_key
                .decrypt(&self.encrypted_key, &self.nonce)
                .map_err(|e| PermsError::Decryption(e.to_string()))?,
        );

        let bytes: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            PermsError::Decryption(format!(
                "invalid key length: expected 32, got {}",
                key_bytes.len()
            ))
        })?;

        Ok(SecretKey::from_bytes(bytes))
    }

    /// Open the share and check that it belongs to `group_id` for `user_id`.
    pub fn open_for(
        &self,
        group_id: GroupId,
        user_id: UserId,
        member_secret: &SecretKey,
    ) -> Result<SecretKey> {
        if self.group_id != group_id || self.user_id != user_id {
            return Err(PermsError::Decryption(format!(
                "share is for {} in {}, not {} in {}",
                self.user_id, self.group_id, user_id, group_id
            )));
        }
        self.open(member_secret)
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

fn context(group_id: GroupId, user_id: UserId, key_epoch: u32) -> [u8; 36] {
    let mut ctx = [0u8; 36];
    ctx[..16].copy_from_slice(group_id.as_bytes());
    ctx[16..32].copy_from_slice(user_id.as_bytes());
    ctx[32..].copy_from_slice(&key_epoch.to_be_bytes());
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share_for(member: &SecretKey, group_secret: &SecretKey) -> MemberKeyShare {
        MemberKeyShare::create(
            GroupId::from_bytes([1; 16]),
            UserId::from_bytes([2; 16]),
            0,
            group_secret,
            &member.public_key(),
        )
        .unwrap()
    }

    #[test]
    fn test_keyshare_roundtrip() {
        let member = SecretKey::generate();
        let group_secret = SecretKey::generate();

        let share = share_for(&member, &group_secret);
        let opened = share.open(&member).unwrap();

        assert_eq!(opened.public_key(), group_secret.public_key());
    }

    #[test]
    fn test_keyshare_wrong_member_fails() {
        let member = SecretKey::generate();
        let other = SecretKey::generate();
        let share = share_for(&member, &SecretKey::generate());

        assert!(matches!(share.open(&other), Err(PermsError::Decryption(_))));
    }

    #[test]
    fn test_keyshare_bound_to_context() {
        let member = SecretKey::generate();
        let mut share = share_for(&member, &SecretKey::generate());

        share.key_epoch = 1;
        assert!(share.open(&member).is_err());

        share.key_epoch = 0;
        share.user_id = UserId::from_bytes([3; 16]);
        assert!(share.open(&member).is_err());
    }

    #[test]
    fn test_open_for_checks_ids() {
        let member = SecretKey::generate();
        let share = share_for(&member, &SecretKey::generate());

        assert!(share
            .open_for(GroupId::from_bytes([9; 16]), share.user_id, &member)
            .is_err());
        assert!(share.open_for(share.group_id, share.user_id, &member).is_ok());
    }

    #[test]
    fn test_keyshare_serialization() {
        let member = SecretKey::generate();
        let share = share_for(&member, &SecretKey::generate());

        let bytes = share.to_bytes().unwrap();
        let recovered = MemberKeyShare::from_bytes(&bytes).unwrap();

        assert_eq!(share, recovered);
    }
}
