//! Utility functions shared by the model and the collaborators.
//!
//! - **Text**: control-character stripping, name normalization, folded matching
//! - **URL validation**: feed source URLs handed to the backend

mod text;
mod url_validator;

pub use text::{contains_folded, normalize_name, strip_control_chars};
pub use url_validator::{check_public_host, validate_source_url, UrlValidationError};

/// Maximum accepted length of a free-text item query.
pub const MAX_TEXT_QUERY_LENGTH: usize = 256;
