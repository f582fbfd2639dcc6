mod assignments;
mod backend;
mod categories;
mod feeds;
mod items;
mod schema;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, NewItem};

pub(crate) use types::into_backend_error;
