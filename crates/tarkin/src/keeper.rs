//! The Keeper: the authorization chain over a store.
//!
//! Every operation that reads or re-wraps key material takes the acting
//! [`Principal`] explicitly. Private keys are unlocked inside the call and
//! dropped (and zeroized) before it returns; nothing is cached between calls.
//!
//! The Keeper's methods are split by concern:
//!
//! - users and authentication (this module)
//! - groups, membership and key rotation (`groups`)
//! - item secrets (`secrets`)
//! - listing and search (`listing`)
//! - the directory tree and favorites (`directories`)

use std::sync::Arc;

use tarkin_core::{
    normalize_email, CoreError, Credential, Group, GroupId, Membership, NewUser, Principal,
    SecretKey, User, UserId, ValidationError,
};
use tarkin_perms::MemberKeyShare;
use tarkin_store::{Store, StoreError};
use tracing::{debug, info, warn};

use crate::config::KeeperConfig;
use crate::error::{KeeperError, Result};

/// The main Keeper struct.
pub struct Keeper<S: Store> {
    /// The storage backend.
    pub(crate) store: Arc<S>,
    /// Configuration.
    pub(crate) config: KeeperConfig,
}

/// A group key opened through one member's share.
pub(crate) struct GroupAccess {
    pub group: Group,
    /// The member edge the key was opened from.
    pub edge: Membership,
    pub secret: SecretKey,
}

impl<S: Store> Keeper<S> {
    /// Create a new keeper over `store`.
    pub fn new(store: S, config: KeeperConfig) -> Self {
        Self::with_shared(Arc::new(store), config)
    }

    /// Create a keeper over a store that is shared with other owners.
    pub fn with_shared(store: Arc<S>, config: KeeperConfig) -> Self {
        Self { store, config }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users and authentication
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a user created with [`NewUser::create`].
    ///
    /// Fails with `Validation(EmailTaken)` if another user has the email,
    /// compared case-insensitively.
    pub async fn register_user(&self, new_user: NewUser) -> Result<User> {
        let user = new_user.into_user();
        match self.store.insert_user(&user).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(ValidationError::EmailTaken.into());
            }
            Err(e) => return Err(e.into()),
        }
        info!(user_id = %user.id, email = %user.email, "registered user");
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or(KeeperError::UserNotFound(id))
    }

    /// Whether the principal is a persisted user whose credential unlocks
    /// the currently stored private key.
    pub async fn is_authenticated(&self, principal: &Principal) -> Result<bool> {
        let Some(stored) = self.store.get_user(principal.id()).await? else {
            return Ok(false);
        };
        match stored.unlock(Some(principal.credential())) {
            Ok(_) => Ok(true),
            Err(CoreError::WrongPassword(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve an email and password to a principal.
    ///
    /// An unknown email and a wrong password fail the same way.
    pub async fn authenticate(&self, email: &str, credential: Credential) -> Result<Principal> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            warn!(%email, "authentication failed: unknown email");
            return Err(KeeperError::AuthenticationFailed);
        };

        match user.unlock(Some(&credential)) {
            Ok(_) => {
                debug!(user_id = %user.id, "authenticated");
                Ok(Principal::new(user, credential))
            }
            Err(CoreError::WrongPassword(_)) => {
                warn!(user_id = %user.id, "authentication failed: wrong password");
                Err(KeeperError::AuthenticationFailed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Try each `(email, password)` candidate in order and return the first
    /// principal that authenticates.
    pub async fn authenticate_first<E, I>(&self, candidates: I) -> Result<Principal>
    where
        E: AsRef<str>,
        I: IntoIterator<Item = (E, Credential)>,
    {
        let candidates: Vec<(String, Credential)> = candidates
            .into_iter()
            .map(|(email, credential)| (email.as_ref().to_string(), credential))
            .collect();

        for (email, credential) in candidates {
            match self.authenticate(&email, credential).await {
                Err(KeeperError::AuthenticationFailed) => continue,
                other => return other,
            }
        }
        Err(KeeperError::AuthenticationFailed)
    }

    /// Re-wrap the principal's private key under `new_credential`.
    ///
    /// The key pair is unchanged. Fails with `WrongPassword` if the
    /// principal's current credential does not unlock the stored key.
    pub async fn change_password(
        &self,
        principal: &Principal,
        new_credential: Credential,
    ) -> Result<Principal> {
        let stored = self.get_user(principal.id()).await?;
        let secret = stored.unlock(Some(principal.credential()))?;

        let updated = stored.with_password(&secret, &new_credential, &self.config.kdf)?;
        self.store
            .update_user_key(
                stored.id,
                &stored.wrapped_private_key,
                &updated.wrapped_private_key,
            )
            .await?;

        info!(user_id = %stored.id, "changed password");
        Ok(Principal::new(updated, new_credential))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────────

    /// Unlock the principal's private key from the stored record.
    ///
    /// A missing user or a rejected credential is `NotAuthorized`.
    pub(crate) async fn authorize(&self, principal: &Principal) -> Result<(User, SecretKey)> {
        let Some(stored) = self.store.get_user(principal.id()).await? else {
            warn!(user_id = %principal.id(), "authorizer is not registered");
            return Err(KeeperError::NotAuthorized(format!(
                "{} is not registered",
                principal.id()
            )));
        };

        match stored.unlock(Some(principal.credential())) {
            Ok(secret) => Ok((stored, secret)),
            Err(CoreError::WrongPassword(reason)) => {
                warn!(user_id = %stored.id, "authorizer credential rejected");
                Err(KeeperError::NotAuthorized(reason))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open the group key through the principal's own share.
    pub(crate) async fn open_group(
        &self,
        group_id: GroupId,
        principal: &Principal,
    ) -> Result<GroupAccess> {
        let (user, user_secret) = self.authorize(principal).await?;

        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or(KeeperError::GroupNotFound(group_id))?;

        let Some(edge) = self.store.get_membership(user.id, group_id).await? else {
            warn!(user_id = %user.id, %group_id, "no key share for group");
            return Err(KeeperError::GroupNotAccessible(group_id));
        };

        let share = MemberKeyShare::from_bytes(&edge.share)?;
        let secret = share.open_for(group_id, user.id, &user_secret)?;

        Ok(GroupAccess {
            group,
            edge,
            secret,
        })
    }

    /// Like [`open_group`](Self::open_group), for operations that need the
    /// principal's membership but not the key itself.
    pub(crate) async fn require_member(
        &self,
        group_id: GroupId,
        principal: &Principal,
    ) -> Result<Membership> {
        let (user, _) = self.authorize(principal).await?;
        match self.store.get_membership(user.id, group_id).await? {
            Some(edge) => Ok(edge),
            None => {
                warn!(user_id = %user.id, %group_id, "not a member of group");
                Err(KeeperError::GroupNotAccessible(group_id))
            }
        }
    }
}
