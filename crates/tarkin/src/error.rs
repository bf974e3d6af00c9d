//! Error types for the Keeper.

use tarkin_core::{CoreError, DirectoryId, GroupId, ItemId, UserId, ValidationError};
use tarkin_perms::PermsError;
use tarkin_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Keeper operations.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// The principal's own password is wrong.
    #[error("wrong password: {0}")]
    WrongPassword(String),

    /// The principal acting as authorizer is not authenticated.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The authorizer holds no key share for the group.
    #[error("group {0} is not accessible")]
    GroupNotAccessible(GroupId),

    /// The principal holds no key share for the item's group.
    #[error("item {0} is not accessible")]
    ItemNotAccessible(ItemId),

    /// Unknown email or wrong password.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("directory not found: {0}")]
    DirectoryNotFound(DirectoryId),

    /// The principal is a member of none of the directory's groups.
    #[error("directory {0} is not accessible")]
    DirectoryNotAccessible(DirectoryId),

    /// The user is not a member of the group.
    #[error("{user_id} is not a member of {group_id}")]
    MembershipNotFound { user_id: UserId, group_id: GroupId },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(CoreError),

    #[error("permission error: {0}")]
    Permission(#[from] PermsError),
}

impl From<CoreError> for KeeperError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::WrongPassword(reason) => KeeperError::WrongPassword(reason),
            CoreError::Validation(e) => KeeperError::Validation(e),
            other => KeeperError::Crypto(other),
        }
    }
}

/// Result type for Keeper operations.
pub type Result<T> = std::result::Result<T, KeeperError>;
