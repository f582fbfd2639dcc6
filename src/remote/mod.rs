//! REST client for the hosted aggregation service.

mod client;
mod dto;

pub use client::{ClientError, RemoteClient};
