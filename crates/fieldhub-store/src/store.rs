//! Store handle, schema, and connection/credential operations
//!
//! The connection is wrapped in a `Mutex` for safe concurrent access from
//! async handlers; SQLite itself runs in serialized mode. Timestamps are
//! stored as RFC 3339 text.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Connection, Credential, NewCredential, join_scopes, parse_scopes};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id                TEXT PRIMARY KEY,
    provider          TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    last_refreshed_at TEXT
);

CREATE TABLE IF NOT EXISTS credentials (
    connection_id TEXT PRIMARY KEY
        REFERENCES connections(id) ON DELETE CASCADE,
    access_token  TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    scopes        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS webhook_events (
    id            TEXT PRIMARY KEY,
    external_id   TEXT,
    content_hash  TEXT NOT NULL,
    topic         TEXT,
    connection_id TEXT,
    payload       TEXT NOT NULL,
    received_at   TEXT NOT NULL
);

-- SQLite UNIQUE treats NULLs as distinct, so id-less duplicates would both
-- insert under a plain constraint. COALESCE makes them collide on the
-- content hash alone.
CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_events_dedupe
    ON webhook_events (COALESCE(external_id, ''), content_hash);

CREATE TABLE IF NOT EXISTS jobs (
    id         TEXT PRIMARY KEY,
    event_id   TEXT NOT NULL REFERENCES webhook_events(id),
    status     TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);
"#;

/// SQLite-backed durable store.
pub struct Store {
    pub(crate) conn: Mutex<rusqlite::Connection>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(&path)?;
        info!(path = %path.as_ref().display(), "opened store");
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a connection and its credential in one transaction.
    ///
    /// Called after a successful OAuth code exchange; this is the only path
    /// that creates connections.
    pub fn create_connection(
        &self,
        provider: &str,
        credential: NewCredential,
    ) -> Result<Connection> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO connections (id, provider, created_at) VALUES (?1, ?2, ?3)",
            params![id, provider, created_at.to_rfc3339()],
        )?;
        tx.execute(
            "INSERT INTO credentials (connection_id, access_token, refresh_token, expires_at, scopes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                credential.access_token,
                credential.refresh_token,
                credential.expires_at.to_rfc3339(),
                join_scopes(&credential.scopes),
            ],
        )?;
        tx.commit()?;

        debug!(connection_id = %id, provider, "created connection");
        Ok(Connection {
            id,
            provider: provider.to_owned(),
            created_at,
            last_refreshed_at: None,
        })
    }

    pub fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, provider, created_at, last_refreshed_at
                 FROM connections WHERE id = ?1",
                params![id],
                connection_row,
            )
            .optional()?;
        row.map(raw_to_connection).transpose()
    }

    /// All connections, oldest first.
    pub fn list_connections(&self) -> Result<Vec<Connection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider, created_at, last_refreshed_at
             FROM connections ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], connection_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(raw_to_connection).collect()
    }

    pub fn count_connections(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM connections", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Delete a connection; the credential row cascades away with it.
    /// Returns whether anything was deleted.
    pub fn delete_connection(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM connections WHERE id = ?1", params![id])?;
        if n > 0 {
            debug!(connection_id = %id, "deleted connection");
        }
        Ok(n > 0)
    }

    /// Read the credential for a connection. Read-only: this path never
    /// mutates the row.
    pub fn get_credential(&self, connection_id: &str) -> Result<Option<Credential>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT connection_id, access_token, refresh_token, expires_at, scopes
                 FROM credentials WHERE connection_id = ?1",
                params![connection_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(connection_id, access_token, refresh_token, expires_at, scopes)| {
            Ok(Credential {
                connection_id,
                access_token,
                refresh_token,
                expires_at: parse_timestamp(&expires_at)?,
                scopes: parse_scopes(&scopes),
            })
        })
        .transpose()
    }

    /// Apply a completed refresh: overwrite the credential row and bump the
    /// connection's last-refresh timestamp, atomically.
    ///
    /// A full overwrite, not a delta — concurrent refreshes converge to the
    /// last provider response received. `scopes: None` preserves the stored
    /// scope set unchanged.
    pub fn apply_refresh(
        &self,
        connection_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
        scopes: Option<&std::collections::BTreeSet<String>>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let updated = match scopes {
            Some(scopes) => tx.execute(
                "UPDATE credentials
                 SET access_token = ?2, refresh_token = ?3, expires_at = ?4, scopes = ?5
                 WHERE connection_id = ?1",
                params![
                    connection_id,
                    access_token,
                    refresh_token,
                    expires_at.to_rfc3339(),
                    join_scopes(scopes),
                ],
            )?,
            None => tx.execute(
                "UPDATE credentials
                 SET access_token = ?2, refresh_token = ?3, expires_at = ?4
                 WHERE connection_id = ?1",
                params![
                    connection_id,
                    access_token,
                    refresh_token,
                    expires_at.to_rfc3339(),
                ],
            )?,
        };
        if updated == 0 {
            return Err(Error::NotFound(format!(
                "connection {connection_id} has no credential"
            )));
        }

        tx.execute(
            "UPDATE connections SET last_refreshed_at = ?2 WHERE id = ?1",
            params![connection_id, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        debug!(connection_id, "applied token refresh");
        Ok(())
    }
}

type RawConnection = (String, String, String, Option<String>);

fn connection_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawConnection> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
}

fn raw_to_connection(raw: RawConnection) -> Result<Connection> {
    let (id, provider, created_at, last_refreshed_at) = raw;
    Ok(Connection {
        id,
        provider,
        created_at: parse_timestamp(&created_at)?,
        last_refreshed_at: last_refreshed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_credential(suffix: &str) -> NewCredential {
        NewCredential {
            access_token: format!("at_{suffix}"),
            refresh_token: format!("rt_{suffix}"),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: parse_scopes("quotes:read quotes:write"),
        }
    }

    #[test]
    fn create_and_get_connection_with_credential() {
        let store = Store::open_in_memory().unwrap();
        let created = store
            .create_connection("fieldhub", new_credential("1"))
            .unwrap();

        let fetched = store.get_connection(&created.id).unwrap().unwrap();
        assert_eq!(fetched.provider, "fieldhub");
        assert!(fetched.last_refreshed_at.is_none());

        let cred = store.get_credential(&created.id).unwrap().unwrap();
        assert_eq!(cred.access_token, "at_1");
        assert_eq!(cred.refresh_token, "rt_1");
        assert!(cred.scopes.contains("quotes:read"));
        assert!(cred.scopes.contains("quotes:write"));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldlink.db");

        let id = {
            let store = Store::open(&path).unwrap();
            store
                .create_connection("fieldhub", new_credential("1"))
                .unwrap()
                .id
        };

        let store = Store::open(&path).unwrap();
        assert!(store.get_credential(&id).unwrap().is_some());
    }

    #[test]
    fn missing_connection_reads_as_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_connection("nope").unwrap().is_none());
        assert!(store.get_credential("nope").unwrap().is_none());
    }

    #[test]
    fn delete_cascades_to_credential() {
        let store = Store::open_in_memory().unwrap();
        let conn = store
            .create_connection("fieldhub", new_credential("1"))
            .unwrap();

        assert!(store.delete_connection(&conn.id).unwrap());
        assert!(store.get_connection(&conn.id).unwrap().is_none());
        assert!(
            store.get_credential(&conn.id).unwrap().is_none(),
            "credential must cascade away with its connection"
        );
        assert!(!store.delete_connection(&conn.id).unwrap());
    }

    #[test]
    fn apply_refresh_overwrites_credential_and_touches_connection() {
        let store = Store::open_in_memory().unwrap();
        let conn = store
            .create_connection("fieldhub", new_credential("1"))
            .unwrap();

        let new_expiry = Utc::now() + Duration::minutes(30);
        store
            .apply_refresh(&conn.id, "at_new", "rt_new", new_expiry, None)
            .unwrap();

        let cred = store.get_credential(&conn.id).unwrap().unwrap();
        assert_eq!(cred.access_token, "at_new");
        assert_eq!(cred.refresh_token, "rt_new");
        assert_eq!(cred.expires_at.timestamp(), new_expiry.timestamp());
        // Scopes preserved when the refresh response omits them
        assert!(cred.scopes.contains("quotes:read"));

        let fetched = store.get_connection(&conn.id).unwrap().unwrap();
        assert!(
            fetched.last_refreshed_at.is_some(),
            "last_refreshed_at must be set by a refresh"
        );
    }

    #[test]
    fn apply_refresh_replaces_scopes_when_given() {
        let store = Store::open_in_memory().unwrap();
        let conn = store
            .create_connection("fieldhub", new_credential("1"))
            .unwrap();

        let narrowed = parse_scopes("quotes:read");
        store
            .apply_refresh(
                &conn.id,
                "at_2",
                "rt_2",
                Utc::now() + Duration::hours(1),
                Some(&narrowed),
            )
            .unwrap();

        let cred = store.get_credential(&conn.id).unwrap().unwrap();
        assert_eq!(cred.scopes, narrowed);
    }

    #[test]
    fn apply_refresh_to_unknown_connection_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let result = store.apply_refresh("ghost", "at", "rt", Utc::now(), None);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn list_connections_returns_all() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_connection("fieldhub", new_credential("a"))
            .unwrap();
        store
            .create_connection("fieldhub", new_credential("b"))
            .unwrap();

        assert_eq!(store.list_connections().unwrap().len(), 2);
        assert_eq!(store.count_connections().unwrap(), 2);
    }
}
