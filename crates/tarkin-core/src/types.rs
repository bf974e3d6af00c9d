//! Strong type definitions for Tarkin.
//!
//! All identifiers are newtypes to prevent misuse at compile time: a
//! `GroupId` can never be passed where a `UserId` is expected.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Generate a new random identifier.
            pub fn generate() -> Self {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 16] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

define_id!(
    /// Identifier of a [`User`](crate::records::User).
    UserId
);
define_id!(
    /// Identifier of a [`Group`](crate::records::Group).
    GroupId
);
define_id!(
    /// Identifier of an [`Item`](crate::records::Item).
    ItemId
);
define_id!(
    /// Identifier of a [`Directory`](crate::records::Directory).
    DirectoryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_hex_roundtrip() {
        let id = GroupId::generate();
        let recovered = GroupId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_id_from_hex_rejects_wrong_length() {
        assert!(UserId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_id_debug_names_the_type() {
        let id = ItemId::from_bytes([0xcd; 16]);
        assert_eq!(format!("{:?}", id), "ItemId(cdcdcdcdcdcd)");
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(DirectoryId::generate(), DirectoryId::generate());
    }
}
