//! On-disk snapshot of a [`VectorIndex`](crate::vector_index::VectorIndex) as
//! a single SQLite file.
//!
//! A snapshot is written to `index.db.tmp` and renamed over `index.db` only
//! after the transaction commits, so readers see either the old snapshot or
//! the complete new one.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use domain::models::{Chunk, Embedding};
use rusqlite::{params, Connection, OpenFlags};
use serde_json::{Map, Value};
use shared::types::{RagError, Result};
use tracing::debug;

use crate::vector_index::IndexManifest;

pub const SNAPSHOT_FILE: &str = "index.db";
const SNAPSHOT_FORMAT: i64 = 1;

const SCHEMA: &str = "
    CREATE TABLE manifest (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE entries (
        position INTEGER PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        text TEXT NOT NULL,
        vector BLOB NOT NULL
    );
";

fn storage_error(e: rusqlite::Error) -> RagError {
    RagError::Storage(e.to_string())
}

pub struct EmbeddingStorage {
    dir: PathBuf,
}

impl EmbeddingStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_FILE}.tmp"))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path().is_file()
    }

    pub fn write_snapshot(&self, manifest: &IndexManifest, entries: &[Embedding]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.temp_path();
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        let result = Self::write_database(&tmp, manifest, entries)
            .and_then(|()| fs::rename(&tmp, self.snapshot_path()).map_err(RagError::from));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn write_database(path: &Path, manifest: &IndexManifest, entries: &[Embedding]) -> Result<()> {
        let mut conn = Connection::open(path).map_err(storage_error)?;
        conn.execute_batch(SCHEMA).map_err(storage_error)?;
        conn.pragma_update(None, "user_version", SNAPSHOT_FORMAT)
            .map_err(storage_error)?;

        let fields = match serde_json::to_value(manifest)? {
            Value::Object(map) => map,
            _ => return Err(RagError::Storage("manifest is not an object".to_string())),
        };

        let tx = conn.transaction().map_err(storage_error)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO manifest (key, value) VALUES (?1, ?2)")
                .map_err(storage_error)?;
            for (key, value) in &fields {
                stmt.execute(params![key, value.to_string()]).map_err(storage_error)?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO entries (position, chunk_id, document_id, chunk_index, start_offset, end_offset, text, vector)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(storage_error)?;
            for (position, embedding) in entries.iter().enumerate() {
                let chunk = &embedding.chunk;
                let vector_bytes = serde_json::to_vec(&embedding.vector)?;
                stmt.execute(params![
                    position as i64,
                    chunk.id,
                    chunk.document_id,
                    chunk.index as i64,
                    chunk.start as i64,
                    chunk.end as i64,
                    chunk.text,
                    vector_bytes
                ])
                .map_err(storage_error)?;
            }
        }
        tx.commit().map_err(storage_error)?;
        conn.close().map_err(|(_, e)| storage_error(e))?;
        debug!(path = %path.display(), entries = entries.len(), "snapshot database written");
        Ok(())
    }

    /// Read the current snapshot. Structural problems come back as
    /// `IndexCorrupt`; compatibility is the caller's concern.
    pub fn read_snapshot(&self) -> Result<(IndexManifest, Vec<Embedding>)> {
        let path = self.snapshot_path();
        if !path.is_file() {
            return Err(RagError::IndexNotFound(path));
        }
        let corrupt = |reason: &dyn Display| RagError::IndexCorrupt {
            path: path.clone(),
            reason: reason.to_string(),
        };

        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| corrupt(&e))?;
        let format: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| corrupt(&e))?;
        if format != SNAPSHOT_FORMAT {
            return Err(corrupt(&format!("unsupported snapshot format {format}")));
        }

        let manifest = Self::read_manifest(&conn).map_err(|e| corrupt(&e))?;
        let entries = Self::read_entries(&conn).map_err(|e| corrupt(&e))?;

        if entries.len() != manifest.chunk_count {
            return Err(corrupt(&format!(
                "manifest lists {} chunks, found {}",
                manifest.chunk_count,
                entries.len()
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != manifest.dimensions) {
            return Err(corrupt(&format!(
                "chunk {} has {} dimensions, manifest says {}",
                bad.chunk.id,
                bad.vector.len(),
                manifest.dimensions
            )));
        }
        Ok((manifest, entries))
    }

    fn read_manifest(conn: &Connection) -> Result<IndexManifest> {
        let mut stmt = conn
            .prepare("SELECT key, value FROM manifest")
            .map_err(storage_error)?;
        let mut rows = stmt.query([]).map_err(storage_error)?;
        let mut fields = Map::new();
        while let Some(row) = rows.next().map_err(storage_error)? {
            let key: String = row.get(0).map_err(storage_error)?;
            let value: String = row.get(1).map_err(storage_error)?;
            fields.insert(key, serde_json::from_str(&value)?);
        }
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    fn read_entries(conn: &Connection) -> Result<Vec<Embedding>> {
        let mut stmt = conn
            .prepare(
                "SELECT position, chunk_id, document_id, chunk_index, start_offset, end_offset, text, vector
                 FROM entries ORDER BY position",
            )
            .map_err(storage_error)?;
        let mut rows = stmt.query([]).map_err(storage_error)?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().map_err(storage_error)? {
            let position: i64 = row.get(0).map_err(storage_error)?;
            if position != entries.len() as i64 {
                return Err(RagError::Storage(format!("entry positions jump to {position}")));
            }
            let index = offset(row.get(3).map_err(storage_error)?, "chunk_index")?;
            let start = offset(row.get(4).map_err(storage_error)?, "start_offset")?;
            let end = offset(row.get(5).map_err(storage_error)?, "end_offset")?;
            if start > end {
                return Err(RagError::Storage(format!("entry {position} ends before it starts")));
            }
            let vector_bytes: Vec<u8> = row.get(7).map_err(storage_error)?;
            entries.push(Embedding {
                chunk: Chunk {
                    id: row.get(1).map_err(storage_error)?,
                    document_id: row.get(2).map_err(storage_error)?,
                    index,
                    start,
                    end,
                    text: row.get(6).map_err(storage_error)?,
                },
                vector: serde_json::from_slice(&vector_bytes)?,
            });
        }
        Ok(entries)
    }
}

fn offset(value: i64, column: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| RagError::Storage(format!("{column} out of range: {value}")))
}
