//! Category-aware feed aggregation.
//!
//! Feeds and items are organized under a user-defined category tree; an item
//! shows under its feed's category and under any category it was assigned
//! to. A [`session::Session`] owns the in-memory catalog, computes filtered
//! views through [`engine`], and persists through a [`backend::Backend`]:
//! the local SQLite [`storage::Database`] or the [`remote::RemoteClient`].

pub mod backend;
pub mod config;
pub mod engine;
pub mod model;
pub mod remote;
pub mod session;
pub mod storage;
pub mod util;
