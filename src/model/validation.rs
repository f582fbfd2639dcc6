use thiserror::Error;

use super::feed::SourceKind;
use super::ids::CategoryId;
use crate::util::UrlValidationError;

/// A create or edit request that is malformed.
///
/// Raised synchronously, before anything is sent to the backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name is empty once control characters and whitespace are removed.
    #[error("Name cannot be empty or whitespace-only")]
    EmptyName,

    /// RSS feeds need a source URL.
    #[error("RSS feeds require a source URL")]
    MissingUrl,

    /// RSS source URL failed validation.
    #[error("Invalid source URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    /// Social source without its identifying field.
    #[error("{kind} feeds require a {field}")]
    MissingSourceField {
        kind: SourceKind,
        field: &'static str,
    },

    /// Both `username` and `hashtag` were supplied.
    #[error("Specify either a username or a hashtag, not both")]
    ConflictingSourceFields,

    /// A field that the source kind does not accept.
    #[error("{kind} feeds do not accept a {field}")]
    UnexpectedSourceField {
        kind: SourceKind,
        field: &'static str,
    },

    /// Referenced parent category is not known.
    #[error("Parent category {0} not found")]
    ParentNotFound(CategoryId),

    /// Referenced category is not known.
    #[error("Category {0} not found")]
    UnknownCategory(CategoryId),

    /// Reparenting would put a category beneath itself.
    #[error("Moving category {category} under {parent} would create a cycle")]
    CycleDetected {
        category: CategoryId,
        parent: CategoryId,
    },

    /// Category still has child categories.
    #[error("Category {0} has child categories; delete or move them first")]
    HasChildren(CategoryId),
}
