use thiserror::Error;

use crate::backend::BackendError;
use crate::model::{CategoryId, ItemId, ValidationError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The request was malformed; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Credentials were rejected. The caller must re-authenticate.
    #[error("Authentication expired; sign in again")]
    AuthExpired,

    #[error(transparent)]
    Backend(BackendError),

    /// The pair is assigned but no assignment record id is known locally.
    #[error("No assignment record known for item {item} in category {category}; sync and retry")]
    AssignmentIdUnknown { category: CategoryId, item: ItemId },
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::AuthExpired => SessionError::AuthExpired,
            other => SessionError::Backend(other),
        }
    }
}

impl SessionError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SessionError::AuthExpired)
    }
}
