//! Errors surfaced by monitored item groups

use crate::session::SessionError;

/// Errors that can occur while driving a monitored item group
///
/// Session faults and per-item rejections are reported per batch: the group
/// does not reconcile which members the server accepted.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Group is already registered with the server")]
    AlreadyRegistered,

    #[error("Failed to register monitored items: {0}")]
    RegistrationFailed(#[source] SessionError),

    #[error("Failed to modify monitored items: {0}")]
    ModifyFailed(#[source] SessionError),

    #[error("Failed to change monitoring mode: {0}")]
    ModeChangeFailed(#[source] SessionError),

    #[error("Failed to delete monitored items: {0}")]
    DeletionFailed(#[source] SessionError),
}

impl GroupError {
    /// The session error behind a failed batch, if any
    pub fn session_error(&self) -> Option<&SessionError> {
        match self {
            GroupError::RegistrationFailed(e)
            | GroupError::ModifyFailed(e)
            | GroupError::ModeChangeFailed(e)
            | GroupError::DeletionFailed(e) => Some(e),
            GroupError::InvalidArgument(_) | GroupError::AlreadyRegistered => None,
        }
    }
}
