//! SQLite record sink.
//!
//! Characters are keyed by target id; races, techniques and affiliations are
//! dimension tables shared between characters. Appending the same target
//! again updates the character row and adds missing links, so re-running a
//! catalog is idempotent.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use scouter::{CanonicalRecord, RecordSink, SinkError};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS races (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS techniques (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS affiliations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS characters (
    id INTEGER PRIMARY KEY,
    target_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    race_id INTEGER REFERENCES races(id),
    power_level INTEGER,
    link TEXT,
    strategy TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    fields TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS character_techniques (
    character_id INTEGER NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    technique_id INTEGER NOT NULL REFERENCES techniques(id) ON DELETE CASCADE,
    PRIMARY KEY (character_id, technique_id)
);

CREATE TABLE IF NOT EXISTS character_affiliations (
    character_id INTEGER NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    affiliation_id INTEGER NOT NULL REFERENCES affiliations(id) ON DELETE CASCADE,
    PRIMARY KEY (character_id, affiliation_id)
);

CREATE INDEX IF NOT EXISTS idx_characters_race ON characters(race_id);
CREATE INDEX IF NOT EXISTS idx_ct_technique ON character_techniques(technique_id);
CREATE INDEX IF NOT EXISTS idx_ca_affiliation ON character_affiliations(affiliation_id);
";

/// Record sink backed by a SQLite database file. Writes run on the
/// blocking pool.
pub struct SqliteSink {
    db: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::with_connection(db)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute_batch(SCHEMA)
            .context("failed to create character tables")?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Run `f` against the connection.
    #[cfg(test)]
    pub fn with_db<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        Ok(f(&db)?)
    }
}

/// Write one record and its dimension links in a single transaction.
fn store(db: &Mutex<Connection>, record: &CanonicalRecord) -> rusqlite::Result<()> {
    let mut db = db.lock().unwrap_or_else(|e| e.into_inner());
    let tx = db.transaction()?;

    let race_id = match record.text("race") {
        Some(race) => Some(upsert_name(&tx, "races", race)?),
        None => None,
    };
    let name = record.text("name").unwrap_or(&record.target_id);
    let fields = serde_json::to_string(&record.fields)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    let character_id: i64 = tx.query_row(
        "INSERT INTO characters (target_id, name, race_id, power_level, link, strategy, attempts, fields)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(target_id) DO UPDATE SET
            name = excluded.name,
            race_id = COALESCE(excluded.race_id, characters.race_id),
            power_level = COALESCE(excluded.power_level, characters.power_level),
            link = excluded.link,
            strategy = excluded.strategy,
            attempts = excluded.attempts,
            fields = excluded.fields,
            updated_at = CURRENT_TIMESTAMP
         RETURNING id",
        params![
            record.target_id,
            name,
            race_id,
            record.integer("power_level"),
            record.provenance.source_url,
            record.provenance.strategy.to_string(),
            record.provenance.attempts,
            fields,
        ],
        |row| row.get(0),
    )?;

    for technique in record.list("techniques") {
        let id = upsert_name(&tx, "techniques", technique)?;
        tx.execute(
            "INSERT OR IGNORE INTO character_techniques (character_id, technique_id) VALUES (?1, ?2)",
            params![character_id, id],
        )?;
    }
    for affiliation in record.list("affiliations") {
        let id = upsert_name(&tx, "affiliations", affiliation)?;
        tx.execute(
            "INSERT OR IGNORE INTO character_affiliations (character_id, affiliation_id) VALUES (?1, ?2)",
            params![character_id, id],
        )?;
    }

    tx.commit()
}

/// Insert `name` into a dimension table if missing and return its id.
fn upsert_name(tx: &Transaction<'_>, table: &str, name: &str) -> rusqlite::Result<i64> {
    let name = name.trim();
    let existing = tx
        .query_row(
            &format!("SELECT id FROM {table} WHERE name = ?1"),
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => Ok(id),
        None => {
            tx.execute(&format!("INSERT INTO {table} (name) VALUES (?1)"), params![name])?;
            Ok(tx.last_insert_rowid())
        }
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn append(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let db = Arc::clone(&self.db);
        let owned = record.clone();
        tokio::task::spawn_blocking(move || store(&db, &owned))
            .await
            .map_err(|e| SinkError::Backend(format!("sqlite writer task failed: {e}")))?
            .map_err(|e| {
                SinkError::Backend(format!("sqlite: failed to store '{}': {e}", record.target_id))
            })?;
        tracing::debug!("stored {} in sqlite", record.target_id);
        Ok(())
    }
}
