//! Groups: creation, membership grants and revocations, key rotation.
//!
//! A group's private key exists only as member key shares. Granting means
//! opening one's own share and wrapping the same key for the target;
//! rotating means replacing every share and re-sealing every item in one
//! store commit.

use bytes::Bytes;
use tarkin_core::{
    now_millis, validate_name, Group, GroupId, Item, Membership, Principal, PublicKey, SecretKey,
    UserId, ValidationError,
};
use tarkin_perms::{MemberKeyShare, SealedSecret};
use tarkin_store::{GroupRotation, InsertResult, ItemFilter, ResealedItem, Store, StoreError};
use tracing::info;

use crate::error::{KeeperError, Result};
use crate::keeper::Keeper;

impl<S: Store> Keeper<S> {
    /// Create a group with `creator` as its first member.
    ///
    /// The creator only needs to be authenticated.
    pub async fn create_group(&self, creator: &Principal, name: &str) -> Result<Group> {
        let (user, _) = self.authorize(creator).await?;
        let name = validate_name(name)?;

        let group_secret = SecretKey::generate();
        let now = now_millis();
        let group = Group {
            id: GroupId::generate(),
            name,
            public_key: group_secret.public_key(),
            key_epoch: 0,
            created_at: now,
        };

        let membership =
            membership_for(&group, user.id, &user.public_key, &group_secret, None, now)?;
        self.store.create_group(&group, &membership).await?;

        info!(group_id = %group.id, group = %group.name, user_id = %user.id, "created group");
        Ok(group)
    }

    pub async fn get_group(&self, id: GroupId) -> Result<Group> {
        self.store
            .get_group(id)
            .await?
            .ok_or(KeeperError::GroupNotFound(id))
    }

    /// The members of a group, by user id.
    pub async fn group_members(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        self.get_group(group_id).await?;
        Ok(self
            .store
            .list_group_memberships(group_id)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect())
    }

    /// Extend membership of `group_id` to `target`, authorized by a member.
    ///
    /// The authorizer must be authenticated (`NotAuthorized`) and hold a
    /// share of the group (`GroupNotAccessible`). Granting to an existing
    /// member replaces their share and reports [`InsertResult::Replaced`].
    /// On failure no edge is written.
    pub async fn grant_membership(
        &self,
        group_id: GroupId,
        target: UserId,
        authorizer: &Principal,
    ) -> Result<InsertResult> {
        let access = self.open_group(group_id, authorizer).await?;
        let target_user = self.get_user(target).await?;

        // The edge is written at the authorizer's epoch; the store rejects it
        // if the group was rotated since.
        let group = Group {
            key_epoch: access.edge.key_epoch,
            ..access.group
        };
        let membership = membership_for(
            &group,
            target_user.id,
            &target_user.public_key,
            &access.secret,
            Some(authorizer.id()),
            now_millis(),
        )?;

        let result = self.store.upsert_membership(&membership).await?;

        info!(
            %group_id,
            group = %group.name,
            user_id = %target,
            granted_by = %authorizer.id(),
            replaced = result == InsertResult::Replaced,
            "granted membership"
        );
        Ok(result)
    }

    /// Remove `user_id` from the group, authorized by a member.
    ///
    /// The last member can not be removed. With
    /// [`rotate_on_revoke`](crate::KeeperConfig::rotate_on_revoke) set, the
    /// group key is rotated in the same commit so the removed member's old
    /// share opens nothing that is still stored.
    pub async fn revoke_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
        authorizer: &Principal,
    ) -> Result<()> {
        let access = self.open_group(group_id, authorizer).await?;

        let members = self.store.list_group_memberships(group_id).await?;
        if !members.iter().any(|m| m.user_id == user_id) {
            return Err(KeeperError::MembershipNotFound { user_id, group_id });
        }
        if members.len() == 1 {
            return Err(ValidationError::LastMember.into());
        }

        let rotation = if self.config.rotate_on_revoke {
            let remaining: Vec<Membership> =
                members.into_iter().filter(|m| m.user_id != user_id).collect();
            let rotation = self
                .prepare_rotation(&access.group, access.edge.key_epoch, &access.secret, &remaining)
                .await?;
            Some(rotation)
        } else {
            None
        };

        match self
            .store
            .revoke_membership(group_id, user_id, rotation.as_ref())
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) if rotation.is_none() => {
                return Err(ValidationError::LastMember.into());
            }
            // Revoked concurrently.
            Err(StoreError::NotFound(_)) => {
                return Err(KeeperError::MembershipNotFound { user_id, group_id });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            %group_id,
            group = %access.group.name,
            %user_id,
            revoked_by = %authorizer.id(),
            rotated = rotation.is_some(),
            "revoked membership"
        );
        Ok(())
    }

    /// Replace the group key pair, authorized by a member.
    ///
    /// Every member gets a new share and every item is re-sealed, in one
    /// commit. Returns the new key epoch.
    pub async fn rotate_group_key(&self, group_id: GroupId, authorizer: &Principal) -> Result<u32> {
        let access = self.open_group(group_id, authorizer).await?;
        let members = self.store.list_group_memberships(group_id).await?;

        let rotation = self
            .prepare_rotation(&access.group, access.edge.key_epoch, &access.secret, &members)
            .await?;
        self.store.rotate_group(&rotation).await?;

        info!(
            %group_id,
            group = %access.group.name,
            key_epoch = rotation.new_epoch(),
            rotated_by = %authorizer.id(),
            "rotated group key"
        );
        Ok(rotation.new_epoch())
    }

    /// Build a rotation of `group` from `epoch` for `members`.
    async fn prepare_rotation(
        &self,
        group: &Group,
        epoch: u32,
        current_secret: &SecretKey,
        members: &[Membership],
    ) -> Result<GroupRotation> {
        let new_secret = SecretKey::generate();
        let rotated = Group {
            public_key: new_secret.public_key(),
            key_epoch: epoch + 1,
            ..group.clone()
        };

        let mut memberships = Vec::with_capacity(members.len());
        for member in members {
            let user = self.get_user(member.user_id).await?;
            memberships.push(membership_for(
                &rotated,
                user.id,
                &user.public_key,
                &new_secret,
                member.granted_by,
                member.created_at,
            )?);
        }

        let items = self.store.list_items(ItemFilter::Group(group.id)).await?;
        let items = items
            .iter()
            .map(|item| reseal(item, current_secret, &rotated))
            .collect::<Result<Vec<_>>>()?;

        Ok(GroupRotation {
            group_id: group.id,
            expected_epoch: epoch,
            public_key: rotated.public_key,
            memberships,
            items,
            rotated_at: now_millis(),
        })
    }
}

/// A membership edge carrying `group_secret` wrapped for one member.
fn membership_for(
    group: &Group,
    user_id: UserId,
    user_public: &PublicKey,
    group_secret: &SecretKey,
    granted_by: Option<UserId>,
    created_at: i64,
) -> Result<Membership> {
    let share = MemberKeyShare::create(group.id, user_id, group.key_epoch, group_secret, user_public)?;
    Ok(Membership {
        user_id,
        group_id: group.id,
        key_epoch: group.key_epoch,
        share: Bytes::from(share.to_bytes()?),
        granted_by,
        created_at,
    })
}

/// Open an item with the current group key and seal it to the rotated one.
fn reseal(item: &Item, current_secret: &SecretKey, rotated: &Group) -> Result<ResealedItem> {
    let sealed = SealedSecret::from_bytes(&item.secret)?;
    let plaintext = sealed.open(item.id, current_secret)?;
    let resealed = SealedSecret::seal(item.id, &plaintext, &rotated.public_key)?;
    Ok(ResealedItem {
        id: item.id,
        previous: item.secret.clone(),
        secret: Bytes::from(resealed.to_bytes()?),
    })
}
