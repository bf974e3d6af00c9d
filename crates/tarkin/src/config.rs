//! Keeper configuration.

use serde::{Deserialize, Serialize};
use tarkin_core::KdfParams;

/// Configuration for the [`Keeper`](crate::Keeper).
///
/// Loadable from JSON; unknown fields are rejected.
///
/// ```
/// use tarkin::KeeperConfig;
///
/// let config = KeeperConfig::from_json(r#"{ "rotate_on_revoke": false }"#).unwrap();
/// assert!(!config.rotate_on_revoke);
/// assert_eq!(config.kdf, Default::default());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeeperConfig {
    /// Argon2id parameters for newly wrapped user keys.
    pub kdf: KdfParams,
    /// Rotate the group key in the same commit as a revocation.
    pub rotate_on_revoke: bool,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            rotate_on_revoke: true,
        }
    }
}

impl KeeperConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// A configuration with a tiny KDF profile, for tests only.
    pub fn insecure_fast() -> Self {
        Self {
            kdf: KdfParams::insecure_fast(),
            ..Self::default()
        }
    }
}
