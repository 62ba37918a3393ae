//! # courier-store
//!
//! Local persistence core for a Bitmessage-style client: the durable
//! inventory of network objects, the in-memory per-stream cache in front of
//! it, and the message store with label filtering and conversation
//! threading.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model, plus the [`Inventory`] overlay that serves high-frequency
//! membership queries from memory. Cryptography, wire parsing and
//! proof-of-work live in the protocol engine; this crate only ever sees
//! fully formed [`NetworkObject`] and [`Message`] values.

pub mod database;
pub mod inventory;
pub mod labels;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod objects;
pub mod resolver;

mod error;
mod threading;

pub use database::Database;
pub use error::StoreError;
pub use inventory::Inventory;
pub use models::*;
pub use resolver::{AddressResolver, PlainResolver};
