//! Webhook event and job persistence
//!
//! An accepted webhook is one event row plus one pending job row, written in
//! a single transaction. The dedupe index decides the race between
//! concurrent duplicate deliveries: whichever insert commits first wins, the
//! loser rolls back whole and reports [`EventInsert::Duplicate`].

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EventInsert, Job, NewEvent, WebhookEvent};
use crate::store::{Store, parse_timestamp};

const JOB_STATUS_PENDING: &str = "pending";

impl Store {
    /// Persist a webhook event and its paired job atomically.
    ///
    /// A unique violation on (external id, content hash) means the delivery
    /// was already accepted: nothing is written (no second job) and the
    /// caller treats it as idempotent success.
    pub fn insert_event(&self, event: NewEvent) -> Result<EventInsert> {
        let event_id = Uuid::new_v4().to_string();
        let job_id = Uuid::new_v4().to_string();
        let received_at = Utc::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO webhook_events
                 (id, external_id, content_hash, topic, connection_id, payload, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event_id,
                event.external_id,
                event.content_hash,
                event.topic,
                event.connection_id,
                event.payload,
                received_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                debug!(content_hash = %event.content_hash, "duplicate webhook event");
                return Ok(EventInsert::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        tx.execute(
            "INSERT INTO jobs (id, event_id, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, event_id, JOB_STATUS_PENDING, received_at.to_rfc3339()],
        )?;
        tx.commit()?;

        debug!(event_id = %event_id, job_id = %job_id, "persisted webhook event");
        Ok(EventInsert::Inserted {
            event: WebhookEvent {
                id: event_id,
                external_id: event.external_id,
                content_hash: event.content_hash,
                topic: event.topic,
                connection_id: event.connection_id,
                payload: event.payload,
                received_at,
            },
            job_id,
        })
    }

    pub fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, external_id, content_hash, topic, connection_id, payload, received_at
                 FROM webhook_events WHERE id = ?1",
                params![id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, Option<String>>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(id, external_id, content_hash, topic, connection_id, payload, received_at)| {
                Ok(WebhookEvent {
                    id,
                    external_id,
                    content_hash,
                    topic,
                    connection_id,
                    payload,
                    received_at: parse_timestamp(&received_at)?,
                })
            },
        )
        .transpose()
    }

    /// The job created alongside an event, if any.
    pub fn job_for_event(&self, event_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, event_id, status, created_at FROM jobs WHERE event_id = ?1",
                params![event_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, event_id, status, created_at)| {
            Ok(Job {
                id,
                event_id,
                status,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .transpose()
    }

    pub fn count_events(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM webhook_events", [], |r| r.get(0))?;
        Ok(count)
    }

    pub fn pending_job_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![JOB_STATUS_PENDING],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

/// Only a unique-index collision reads as a duplicate delivery. Other
/// constraint failures (NOT NULL, FK) must surface as errors, not silently
/// ack as deduped.
fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(external_id: Option<&str>, hash: &str) -> NewEvent {
        NewEvent {
            external_id: external_id.map(str::to_owned),
            content_hash: hash.to_owned(),
            topic: Some("QUOTE_CREATED".into()),
            connection_id: None,
            payload: r#"{"id":"q-1"}"#.into(),
        }
    }

    #[test]
    fn insert_creates_event_and_pending_job() {
        let store = Store::open_in_memory().unwrap();
        let outcome = store.insert_event(event(Some("evt-1"), "hash-a")).unwrap();

        let EventInsert::Inserted { event, job_id } = outcome else {
            panic!("first insert must not dedupe");
        };
        let fetched = store.get_event(&event.id).unwrap().unwrap();
        assert_eq!(fetched.external_id.as_deref(), Some("evt-1"));
        assert_eq!(fetched.topic.as_deref(), Some("QUOTE_CREATED"));

        let job = store.job_for_event(&event.id).unwrap().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.status, "pending");
        assert_eq!(store.pending_job_count().unwrap(), 1);
    }

    #[test]
    fn duplicate_pair_dedupes_without_second_job() {
        let store = Store::open_in_memory().unwrap();
        store.insert_event(event(Some("evt-1"), "hash-a")).unwrap();

        let outcome = store.insert_event(event(Some("evt-1"), "hash-a")).unwrap();
        assert!(matches!(outcome, EventInsert::Duplicate));
        assert_eq!(store.count_events().unwrap(), 1);
        assert_eq!(
            store.pending_job_count().unwrap(),
            1,
            "dedupe must not create a second job"
        );
    }

    #[test]
    fn same_external_id_different_content_both_persist() {
        let store = Store::open_in_memory().unwrap();
        store.insert_event(event(Some("evt-1"), "hash-a")).unwrap();
        let outcome = store.insert_event(event(Some("evt-1"), "hash-b")).unwrap();
        assert!(matches!(outcome, EventInsert::Inserted { .. }));
        assert_eq!(store.count_events().unwrap(), 2);
    }

    #[test]
    fn idless_duplicates_still_collide_on_hash() {
        // NULL external ids must not defeat the dedupe constraint
        let store = Store::open_in_memory().unwrap();
        store.insert_event(event(None, "hash-a")).unwrap();
        let outcome = store.insert_event(event(None, "hash-a")).unwrap();
        assert!(matches!(outcome, EventInsert::Duplicate));
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[test]
    fn only_unique_violations_read_as_duplicates() {
        let unique = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            None,
        );
        assert!(is_unique_violation(&unique));

        // A NOT NULL failure is a real error, never a dedupe
        let not_null = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL),
            None,
        );
        assert!(!is_unique_violation(&not_null));

        let foreign_key = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            None,
        );
        assert!(!is_unique_violation(&foreign_key));
    }

    #[test]
    fn idless_and_identified_events_do_not_collide() {
        let store = Store::open_in_memory().unwrap();
        store.insert_event(event(None, "hash-a")).unwrap();
        let outcome = store.insert_event(event(Some("evt-1"), "hash-a")).unwrap();
        assert!(matches!(outcome, EventInsert::Inserted { .. }));
    }

    #[test]
    fn event_survives_connection_deletion() {
        let store = Store::open_in_memory().unwrap();
        let conn = store
            .create_connection(
                "fieldhub",
                crate::models::NewCredential {
                    access_token: "at".into(),
                    refresh_token: "rt".into(),
                    expires_at: Utc::now(),
                    scopes: Default::default(),
                },
            )
            .unwrap();

        let mut ev = event(Some("evt-1"), "hash-a");
        ev.connection_id = Some(conn.id.clone());
        let EventInsert::Inserted { event, .. } = store.insert_event(ev).unwrap() else {
            panic!("insert must succeed");
        };

        store.delete_connection(&conn.id).unwrap();
        assert!(
            store.get_event(&event.id).unwrap().is_some(),
            "webhook events are historical and outlive their connection"
        );
    }
}
