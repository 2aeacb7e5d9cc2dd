// 💾 Artifact store - SQLite persistence for built cache tables
//
// Each entity class's table is stored as one JSON artifact keyed by class name,
// so a later run can skip the registry entirely ("dry run"). Every live build
// also leaves a receipt: when it was queried and when delivery started/ended.

use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// SHA-256 hex digest of an artifact payload
pub fn fingerprint(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub fingerprint: String,
    pub row_count: i64,
    pub written_at: DateTime<Utc>,
}

/// One build, as recorded in `build_receipts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReceipt {
    pub id: i64,
    pub query_time: DateTime<Utc>,
    pub start_delivery_time: Option<DateTime<Utc>>,
    pub end_delivery_time: Option<DateTime<Utc>>,
    pub historic: bool,
    pub entity_count: Option<i64>,
    pub issue_count: Option<i64>,
}

pub struct ArtifactStore {
    conn: Connection,
}

impl ArtifactStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::setup(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        // WAL for crash recovery; in-memory databases answer "memory"
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "opened artifact store");

        // ======================================================================
        // Artifacts (one row per entity class, plus the DAR memo)
        // ======================================================================
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_artifacts (
                name TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                written_at TEXT NOT NULL
            )",
            [],
        )?;

        // ======================================================================
        // Build receipts
        // ======================================================================
        conn.execute(
            "CREATE TABLE IF NOT EXISTS build_receipts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_time TEXT NOT NULL,
                start_delivery_time TEXT,
                end_delivery_time TEXT,
                historic INTEGER NOT NULL,
                entity_count INTEGER,
                issue_count INTEGER
            )",
            [],
        )?;

        Ok(ArtifactStore { conn })
    }

    // ========================================================================
    // ARTIFACTS
    // ========================================================================

    /// Serialize and store an artifact, replacing any previous one; returns its fingerprint
    pub fn save_artifact<T: Serialize>(&self, name: &str, value: &T, row_count: usize) -> Result<String> {
        let payload = serde_json::to_string(value).map_err(|source| CacheError::Artifact {
            name: name.to_string(),
            source,
        })?;
        self.save_payload(name, &payload, row_count)
    }

    /// Store an already serialized artifact
    pub fn save_payload(&self, name: &str, payload: &str, row_count: usize) -> Result<String> {
        upsert(&self.conn, name, payload, row_count)
    }

    /// Store a set of `(name, payload, rows)` artifacts in one transaction
    ///
    /// Either every artifact is replaced or none is; returns the fingerprints in order.
    pub fn save_payloads(&self, artifacts: &[(String, String, usize)]) -> Result<Vec<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut digests = Vec::with_capacity(artifacts.len());
        for (name, payload, row_count) in artifacts {
            digests.push(upsert(&tx, name, payload, *row_count)?);
        }
        tx.commit()?;
        Ok(digests)
    }

    /// Raw JSON payload of an artifact, if present
    pub fn load_payload(&self, name: &str) -> Result<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM cache_artifacts WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    /// Load and deserialize an artifact; a missing one is an error
    pub fn load_artifact<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let payload = self
            .load_payload(name)?
            .ok_or_else(|| CacheError::MissingArtifact(name.to_string()))?;

        serde_json::from_str(&payload).map_err(|source| CacheError::Artifact {
            name: name.to_string(),
            source,
        })
    }

    pub fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, fingerprint, row_count, written_at
             FROM cache_artifacts
             ORDER BY name",
        )?;

        let artifacts = stmt
            .query_map([], |row| {
                Ok(ArtifactInfo {
                    name: row.get(0)?,
                    fingerprint: row.get(1)?,
                    row_count: row.get(2)?,
                    written_at: timestamp(row, 3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(artifacts)
    }

    // ========================================================================
    // RECEIPTS
    // ========================================================================

    /// Record the start of a build; returns the receipt id
    pub fn insert_receipt(&self, query_time: DateTime<Utc>, historic: bool) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO build_receipts (query_time, historic) VALUES (?1, ?2)",
            params![query_time.to_rfc3339(), historic],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record delivery times and counts of a finished build
    pub fn finish_receipt(
        &self,
        id: i64,
        start_delivery_time: DateTime<Utc>,
        end_delivery_time: DateTime<Utc>,
        entity_count: usize,
        issue_count: usize,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE build_receipts
             SET start_delivery_time = ?2, end_delivery_time = ?3, entity_count = ?4, issue_count = ?5
             WHERE id = ?1",
            params![
                id,
                start_delivery_time.to_rfc3339(),
                end_delivery_time.to_rfc3339(),
                entity_count as i64,
                issue_count as i64,
            ],
        )?;

        if updated == 0 {
            return Err(CacheError::Store(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    pub fn latest_receipt(&self) -> Result<Option<BuildReceipt>> {
        let receipt = self
            .conn
            .query_row(
                "SELECT id, query_time, start_delivery_time, end_delivery_time,
                        historic, entity_count, issue_count
                 FROM build_receipts
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok(BuildReceipt {
                        id: row.get(0)?,
                        query_time: timestamp(row, 1)?,
                        start_delivery_time: optional_timestamp(row, 2)?,
                        end_delivery_time: optional_timestamp(row, 3)?,
                        historic: row.get(4)?,
                        entity_count: row.get(5)?,
                        issue_count: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(receipt)
    }
}

/// Insert or replace one artifact row; returns its fingerprint
fn upsert(conn: &Connection, name: &str, payload: &str, row_count: usize) -> Result<String> {
    let digest = fingerprint(payload);

    conn.execute(
        "INSERT INTO cache_artifacts (name, payload, fingerprint, row_count, written_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            payload = excluded.payload,
            fingerprint = excluded.fingerprint,
            row_count = excluded.row_count,
            written_at = excluded.written_at",
        params![name, payload, digest, row_count as i64, Utc::now().to_rfc3339()],
    )?;

    debug!(artifact = name, rows = row_count, fingerprint = %digest, "saved artifact");
    Ok(digest)
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw, idx)
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_timestamp(&raw, idx)).transpose()
}

fn parse_timestamp(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// TESTS
// ============================================================================
