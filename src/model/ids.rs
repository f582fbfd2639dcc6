//! Strongly typed identifiers.
//!
//! Every entity is addressed by a server-assigned integer. Wrapping each in
//! its own type keeps a feed id from ever being passed where an item id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw integer value as stored by the backend.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

entity_id!(
    /// Identifier of a category node.
    CategoryId
);
entity_id!(
    /// Identifier of a configured feed.
    FeedId
);
entity_id!(
    /// Identifier of an ingested item.
    ItemId
);
entity_id!(
    /// Identifier of one item-to-category assignment record.
    AssignmentId
);
