//! The access predicate.
//!
//! Visibility is computed from a user's membership edges alone. Nothing here
//! touches a credential or a private key: listing is public metadata, and
//! reading a secret is a separate, key-gated step.

use std::collections::HashSet;

use tarkin_core::{Directory, GroupId, Item, Membership, UserId};

/// What one user can see.
#[derive(Debug, Clone)]
pub struct AccessView {
    groups: HashSet<GroupId>,
}

impl AccessView {
    /// Build the view from the user's memberships. Edges belonging to other
    /// users are ignored.
    pub fn from_memberships<'a>(
        user_id: UserId,
        memberships: impl IntoIterator<Item = &'a Membership>,
    ) -> Self {
        let groups = memberships
            .into_iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.group_id)
            .collect();
        Self { groups }
    }

    pub fn is_member(&self, group_id: GroupId) -> bool {
        self.groups.contains(&group_id)
    }

    /// An item is listable iff its group is one of the user's groups.
    pub fn can_list_item(&self, item: &Item) -> bool {
        self.is_member(item.group_id)
    }

    /// The root is always listable. Any other directory is listable iff one
    /// of its associated groups is one of the user's groups.
    pub fn can_list_directory(&self, directory: &Directory, directory_groups: &[GroupId]) -> bool {
        directory.is_root() || directory_groups.iter().any(|g| self.is_member(*g))
    }
}
