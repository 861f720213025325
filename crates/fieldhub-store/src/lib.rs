//! Durable store for FieldHub connections, credentials, webhook events and
//! jobs
//!
//! Single SQLite database behind a mutex. SQLite's ACID guarantees carry the
//! two invariants this integration depends on: multi-row writes (connection +
//! credential, event + job) are all-or-nothing, and the unique index on
//! `(external_id, content_hash)` leaves exactly one winner under concurrent
//! duplicate webhook delivery.

mod error;
mod events;
mod models;
mod store;

pub use error::{Error, Result};
pub use models::{
    Connection, Credential, EventInsert, Job, NewCredential, NewEvent, WebhookEvent, join_scopes,
    parse_scopes,
};
pub use store::Store;
