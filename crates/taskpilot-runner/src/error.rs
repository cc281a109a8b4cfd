//! Runner error types.

use taskpilot_store::StoreError;
use thiserror::Error;

/// A remote task-tracker refresh failed. Retried with a fixed delay,
/// isolated per account.
#[derive(Debug, Error)]
#[error("remote sync failed: {0}")]
pub struct RemoteSyncError(pub String);

impl RemoteSyncError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure of one assistant's execution for one account. Caught and
/// logged by the scheduler; never aborts sibling assistants or accounts.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteSyncError),
    #[error("{0}")]
    Failed(String),
}

impl AssistantError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
