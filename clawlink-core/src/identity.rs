// ABOUTME: Persistent per-channel owner identity storage backed by SQLite
// ABOUTME: One authorization record per channel, written synchronously on verification

use crate::error::StoreError;
use crate::traits::ChannelKind;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A persisted channel binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRecord {
    pub channel: ChannelKind,
    pub authorized_identity: Option<String>,
    /// RFC 3339 timestamp of the binding, if known
    pub bound_at: Option<String>,
}

/// Storage for the single authorized identity of each channel.
///
/// `save` must be durable when it returns: connectors send the confirmation
/// reply only after it succeeds.
pub trait IdentityStore: Send + Sync {
    fn load(&self, channel: ChannelKind) -> Result<Option<String>, StoreError>;

    fn save(&self, channel: ChannelKind, identity: &str) -> Result<(), StoreError>;

    /// External reset: null the binding so the next process start asks for a code again
    fn clear(&self, channel: ChannelKind) -> Result<(), StoreError>;

    fn record(&self, channel: ChannelKind) -> Result<AuthorizationRecord, StoreError> {
        Ok(AuthorizationRecord {
            channel,
            authorized_identity: self.load(channel)?,
            bound_at: None,
        })
    }
}

// =============================================================================
// SQLite store
// =============================================================================

#[derive(Clone)]
pub struct SqliteIdentityStore {
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteIdentityStore {
    /// Open (creating if needed) `identities.db` inside `data_dir`
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("identities.db");
        let conn = Connection::open(&db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS authorizations (
                channel TEXT PRIMARY KEY,
                authorized_identity TEXT,
                bound_at TEXT
            )",
            [],
        )?;

        tracing::info!(db = %db_path.display(), "Identity store initialized");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn load(&self, channel: ChannelKind) -> Result<Option<String>, StoreError> {
        Ok(self.record(channel)?.authorized_identity)
    }

    fn save(&self, channel: ChannelKind, identity: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO authorizations (channel, authorized_identity, bound_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(channel) DO UPDATE SET
                authorized_identity = excluded.authorized_identity,
                bound_at = excluded.bound_at",
            params![channel.as_str(), identity, now],
        )?;
        tracing::info!(channel = %channel, "Authorized identity persisted");
        Ok(())
    }

    fn clear(&self, channel: ChannelKind) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "UPDATE authorizations SET authorized_identity = NULL, bound_at = NULL
             WHERE channel = ?1",
            params![channel.as_str()],
        )?;
        tracing::info!(channel = %channel, "Authorized identity cleared");
        Ok(())
    }

    fn record(&self, channel: ChannelKind) -> Result<AuthorizationRecord, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT authorized_identity, bound_at FROM authorizations WHERE channel = ?1",
        )?;
        let row = stmt.query_row(params![channel.as_str()], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
        });

        match row {
            Ok((authorized_identity, bound_at)) => Ok(AuthorizationRecord {
                channel,
                authorized_identity,
                bound_at,
            }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(AuthorizationRecord {
                channel,
                authorized_identity: None,
                bound_at: None,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Non-persistent store for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryIdentityStore {
    records: Mutex<HashMap<ChannelKind, String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(channel: ChannelKind, identity: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut records) = store.records.lock() {
            records.insert(channel, identity.into());
        }
        store
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self, channel: ChannelKind) -> Result<Option<String>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&channel).cloned())
    }

    fn save(&self, channel: ChannelKind, identity: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(channel, identity.to_string());
        Ok(())
    }

    fn clear(&self, channel: ChannelKind) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.remove(&channel);
        Ok(())
    }
}
