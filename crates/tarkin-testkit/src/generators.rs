//! Proptest generators for property-based testing.

use proptest::prelude::*;

use tarkin_core::{Credential, DirectoryId, GroupId, ItemId, Pattern, UserId};

/// Generate a random UserId.
pub fn user_id() -> impl Strategy<Value = UserId> {
    any::<[u8; 16]>().prop_map(UserId::from_bytes)
}

/// Generate a random GroupId.
pub fn group_id() -> impl Strategy<Value = GroupId> {
    any::<[u8; 16]>().prop_map(GroupId::from_bytes)
}

/// Generate a random ItemId.
pub fn item_id() -> impl Strategy<Value = ItemId> {
    any::<[u8; 16]>().prop_map(ItemId::from_bytes)
}

/// Generate a random DirectoryId.
pub fn directory_id() -> impl Strategy<Value = DirectoryId> {
    any::<[u8; 16]>().prop_map(DirectoryId::from_bytes)
}

/// A password a user account accepts: 8 to 32 characters.
pub fn user_password() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 !#%&*+,.:;=?@^_~-]{8,32}"
}

/// A non-empty password below the user floor.
pub fn short_password() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9]{1,7}"
}

/// A password above the user ceiling.
pub fn long_password() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9]{33,64}"
}

/// A pair of distinct user passwords.
pub fn distinct_passwords() -> impl Strategy<Value = (String, String)> {
    (user_password(), user_password()).prop_filter("passwords differ", |(a, b)| a != b)
}

/// Wrap a generated password.
pub fn credential(password: &str) -> Credential {
    Credential::new(password)
}

/// A valid user or group name.
pub fn name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 '-]{0,63}"
}

/// A valid email address.
pub fn email() -> impl Strategy<Value = String> {
    ("[a-z0-9_+.-]{1,20}", "[a-z0-9-]{1,20}", "[a-z]{2,6}")
        .prop_map(|(local, domain, tld)| format!("{local}@{domain}.{tld}"))
}

/// A string that is not an email address.
pub fn invalid_email() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9]{1,20}",
        "[a-z0-9]{1,10}@",
        "@[a-z]{1,10}\\.[a-z]{2,4}",
        "[a-z]{1,10}@[a-z]{1,10}",
        "[a-z]{1,10}@[a-z]{1,10}\\.[0-9]{1,3}",
    ]
}

/// A valid directory name.
pub fn directory_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-][a-zA-Z0-9 _.-]{0,31}"
}

/// A value, and a pattern built from chunks of it that must match it.
///
/// The pattern keeps some of the value's fragments in order and puts `*`
/// between them.
pub fn matching_pattern() -> impl Strategy<Value = (String, Pattern)> {
    prop::collection::vec("[a-z0-9/_%-]{1,6}", 1..6).prop_flat_map(|chunks| {
        let value = chunks.concat();
        let n = chunks.len();
        prop::collection::vec(any::<bool>(), n).prop_map(move |keep| {
            let pattern = chunks
                .iter()
                .zip(&keep)
                .filter(|(_, keep)| **keep)
                .map(|(chunk, _)| chunk.as_str())
                .collect::<Vec<_>>()
                .join("*");
            (value.clone(), Pattern::new(pattern))
        })
    })
}

/// Plaintext secret bytes.
pub fn secret(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}
