//! Principals: a user record together with the credential that claims it.

use std::fmt;

use crate::credential::Credential;
use crate::crypto::SecretKey;
use crate::error::CoreError;
use crate::records::User;
use crate::types::UserId;

/// A claimed identity for the duration of one operation.
///
/// A `Principal` holds the password, never the private key. Every operation
/// that needs the key calls [`Principal::unlock`] and drops the result before
/// it returns. Holding a `Principal` does not prove authentication: that also
/// needs the record to be persisted, which only the store can answer.
pub struct Principal {
    user: User,
    credential: Credential,
}

impl Principal {
    pub fn new(user: User, credential: Credential) -> Self {
        Self { user, credential }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn id(&self) -> UserId {
        self.user.id
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Unlock this principal's private key.
    pub fn unlock(&self) -> Result<SecretKey, CoreError> {
        self.user.unlock(Some(&self.credential))
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.user.id)
            .field("email", &self.user.email)
            .field("credential", &self.credential)
            .finish()
    }
}
