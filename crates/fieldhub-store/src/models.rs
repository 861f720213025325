//! Row types for the store

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One authorized link to a FieldHub account. Owns exactly one [`Credential`].
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

/// Token record for a connection.
///
/// Access token and expiry are always written together; only the initial
/// exchange and the refresh operation mutate this row.
#[derive(Debug, Clone)]
pub struct Credential {
    pub connection_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
}

/// Credential fields for the initial insert.
#[derive(Debug)]
pub struct NewCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
}

/// One accepted webhook delivery. Created once, never updated or deleted by
/// this subsystem.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub external_id: Option<String>,
    pub content_hash: String,
    pub topic: Option<String>,
    pub connection_id: Option<String>,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

/// Webhook event fields for insertion.
#[derive(Debug)]
pub struct NewEvent {
    pub external_id: Option<String>,
    pub content_hash: String,
    pub topic: Option<String>,
    pub connection_id: Option<String>,
    pub payload: String,
}

/// Work-queue record paired 1:1 with a fresh webhook event. Created as
/// `pending`; terminal states belong to the external worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub event_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a webhook event insert.
#[derive(Debug)]
pub enum EventInsert {
    /// Fresh event persisted together with its job.
    Inserted { event: WebhookEvent, job_id: String },
    /// The (external id, content hash) pair already exists; nothing written.
    Duplicate,
}

/// Parse a provider scope string (space-separated) into a scope set.
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_owned).collect()
}

/// Join a scope set back into the stored space-separated form.
pub fn join_scopes(scopes: &BTreeSet<String>) -> String {
    scopes.iter().cloned().collect::<Vec<_>>().join(" ")
}
