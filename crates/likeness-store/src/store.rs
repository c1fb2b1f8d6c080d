//! Person records and face samples.

use crate::cache::{GenerationCache, IdentityMap};
use crate::pool::ConnectionPool;
use chrono::{DateTime, SecondsFormat, Utc};
use likeness_core::{CanonicalImage, GrayView, Label};
use rusqlite::{params, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Store-assigned person identifier. Doubles as the classifier label.
pub type PersonId = Label;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("person {0} does not exist")]
    UnknownPerson(PersonId),
    #[error("sample image: {0}")]
    Image(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store configuration: {0}")]
    Config(String),
}

/// An enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    /// False while the person's enrollment is still capturing.
    pub committed: bool,
}

/// Pooled, thread-safe access to persons and their samples.
pub struct IdentityStore {
    pool: ConnectionPool,
    names: GenerationCache<IdentityMap>,
}

impl IdentityStore {
    /// Open (or create) the database at `path` with `pool_size` connections.
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Config(format!("creating {}: {e}", parent.display())))?;
        }
        let pool = ConnectionPool::open(path, pool_size)?;
        tracing::info!(path = %path.display(), pool_size, "identity store opened");
        Ok(Self {
            pool,
            names: GenerationCache::new(),
        })
    }

    /// Insert an uncommitted person. Never returns an id for a row that was
    /// not written.
    ///
    /// The person and any samples added for them stay out of the corpus and
    /// the identity map until [`commit_person`](Self::commit_person).
    pub fn create_person(&self, name: &str, note: Option<&str>) -> Result<PersonId, StoreError> {
        let conn = self.pool.get();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        conn.execute(
            "INSERT INTO persons (name, note, created_at, committed) VALUES (?1, ?2, ?3, 0)",
            params![name, note, created_at],
        )
        .map_err(constraint_error)?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.names.invalidate();
        tracing::info!(person = id, name, "person created");
        Ok(id)
    }

    /// Append a sample for `person`; returns its 1-based sequence number.
    pub fn add_sample(&self, person: PersonId, image: &CanonicalImage) -> Result<u32, StoreError> {
        let png = encode_png(image)?;
        let captured_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut conn = self.pool.get();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists = tx
            .query_row("SELECT 1 FROM persons WHERE id = ?1", [person], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(StoreError::UnknownPerson(person));
        }
        let sequence: u32 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM samples WHERE person_id = ?1",
            [person],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO samples (person_id, sequence, size, image, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![person, sequence, image.size(), png, captured_at],
        )
        .map_err(constraint_error)?;
        tx.commit()?;
        drop(conn);

        self.names.invalidate();
        tracing::debug!(person, sequence, "sample stored");
        Ok(sequence)
    }

    /// Mark a finished enrollment, making the person trainable and nameable.
    pub fn commit_person(&self, person: PersonId) -> Result<(), StoreError> {
        let conn = self.pool.get();
        let updated = conn.execute("UPDATE persons SET committed = 1 WHERE id = ?1", [person])?;
        drop(conn);
        if updated == 0 {
            return Err(StoreError::UnknownPerson(person));
        }

        self.names.invalidate();
        tracing::info!(person, "person committed");
        Ok(())
    }

    /// Remove a person and all of their samples in one transaction.
    ///
    /// Deleting an absent id is not an error. Returns whether a row existed.
    /// The identity map is invalidated either way.
    pub fn delete_person(&self, person: PersonId) -> Result<bool, StoreError> {
        let result = self.delete_rows(person);
        self.names.invalidate();
        let existed = result?;
        tracing::info!(person, existed, "person deleted");
        Ok(existed)
    }

    fn delete_rows(&self, person: PersonId) -> Result<bool, StoreError> {
        let mut conn = self.pool.get();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let samples = tx.execute("DELETE FROM samples WHERE person_id = ?1", [person])?;
        let persons = tx.execute("DELETE FROM persons WHERE id = ?1", [person])?;
        tx.commit()?;
        tracing::debug!(person, samples, "deleted sample rows");
        Ok(persons > 0)
    }

    pub fn get_person(&self, person: PersonId) -> Result<Option<Person>, StoreError> {
        let conn = self.pool.get();
        let row = conn
            .query_row(
                "SELECT id, name, note, created_at, committed FROM persons WHERE id = ?1",
                [person],
                person_columns,
            )
            .optional()?;
        row.map(into_person).transpose()
    }

    /// All persons, including uncommitted ones, ordered by id ascending.
    pub fn list_persons(&self) -> Result<Vec<Person>, StoreError> {
        let conn = self.pool.get();
        let mut stmt = conn.prepare("SELECT id, name, note, created_at, committed FROM persons ORDER BY id")?;
        let persons = stmt
            .query_map([], person_columns)?
            .map(|row| into_person(row?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(persons)
    }

    pub fn sample_count(&self, person: PersonId) -> Result<usize, StoreError> {
        let conn = self.pool.get();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE person_id = ?1",
            [person],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Snapshot of every sample of every committed person.
    ///
    /// A single statement, so concurrent writes are either wholly visible or
    /// not at all. Ordered by person id, then capture order.
    pub fn load_corpus(&self) -> Result<Vec<(CanonicalImage, PersonId)>, StoreError> {
        let conn = self.pool.get();
        let mut stmt = conn.prepare(
            "SELECT s.person_id, s.sequence, s.size, s.image
             FROM samples s JOIN persons p ON p.id = s.person_id
             WHERE p.committed = 1
             ORDER BY s.person_id, s.sequence",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, PersonId>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut corpus = Vec::new();
        for row in rows {
            let (person, sequence, size, png) = row?;
            let image = decode_png(&png, size).map_err(|e| {
                StoreError::Corrupt(format!("sample ({person}, {sequence}): {e}"))
            })?;
            corpus.push((image, person));
        }
        tracing::debug!(samples = corpus.len(), "corpus loaded");
        Ok(corpus)
    }

    /// Committed person id to name, rebuilt only when the store changed since
    /// the last read.
    pub fn identity_map(&self) -> Result<Arc<IdentityMap>, StoreError> {
        self.names.get_or_rebuild(|| {
            let conn = self.pool.get();
            let mut stmt = conn.prepare("SELECT id, name FROM persons WHERE committed = 1")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let map = rows.collect::<Result<IdentityMap, _>>()?;
            tracing::debug!(persons = map.len(), "identity map rebuilt");
            Ok(map)
        })
    }

    /// Force the next [`identity_map`](Self::identity_map) call to reload.
    pub fn invalidate(&self) -> u64 {
        self.names.invalidate()
    }

    /// Current mutation generation.
    pub fn generation(&self) -> u64 {
        self.names.generation()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

type PersonRow = (PersonId, String, Option<String>, String, bool);

fn person_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_person((id, name, note, created_at, committed): PersonRow) -> Result<Person, StoreError> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt(format!("person {id} created_at {created_at:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(Person {
        id,
        name,
        note,
        created_at,
        committed,
    })
}

fn constraint_error(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Constraint(msg.unwrap_or_else(|| e.to_string()))
        }
        other => StoreError::Sqlite(other),
    }
}

fn encode_png(image: &CanonicalImage) -> Result<Vec<u8>, StoreError> {
    let gray = image::GrayImage::from_raw(image.size(), image.size(), image.pixels().to_vec())
        .ok_or_else(|| StoreError::Image("pixel buffer does not match size".into()))?;
    let mut png = Vec::new();
    gray.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| StoreError::Image(e.to_string()))?;
    Ok(png)
}

fn decode_png(png: &[u8], size: u32) -> Result<CanonicalImage, String> {
    let gray = image::load_from_memory_with_format(png, image::ImageFormat::Png)
        .map_err(|e| e.to_string())?
        .into_luma8();
    if gray.dimensions() != (size, size) {
        let (w, h) = gray.dimensions();
        return Err(format!("decoded {w}x{h}, expected {size}x{size}"));
    }
    CanonicalImage::from_raw(size, gray.into_raw()).ok_or_else(|| "empty image".to_string())
}
