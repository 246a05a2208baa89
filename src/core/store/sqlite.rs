//! SQLite record store.
//!
//! Every save writes a complete database to a temp file in the target
//! directory and renames it over the previous one, so a crash mid-save
//! leaves the old state intact. The schema version lives in
//! `PRAGMA user_version`.

use super::{RecordStore, Snapshot};
use crate::core::cluster::{PinTarget, PinnedAssignments};
use crate::core::config::FingerprintParams;
use crate::core::extractor::{CaptureSource, CaptureTime, ContentHash, Fingerprint};
use crate::core::record::{FileStamp, ImageRecord, RecordTable, UnreadableFile};
use crate::error::StoreError;
use chrono::DateTime;
use rusqlite::{params, Connection, OpenFlags, Transaction};
use std::path::{Path, PathBuf};

/// Current on-disk schema
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA: &str = "
    CREATE TABLE meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE records (
        path BLOB PRIMARY KEY,
        size INTEGER NOT NULL,
        modified_secs INTEGER NOT NULL,
        modified_nanos INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        capture_secs INTEGER NOT NULL,
        capture_nanos INTEGER NOT NULL,
        capture_source TEXT NOT NULL,
        fingerprint BLOB NOT NULL,
        content_hash BLOB NOT NULL
    );
    CREATE TABLE unreadable (
        path BLOB PRIMARY KEY,
        size INTEGER NOT NULL,
        modified_secs INTEGER NOT NULL,
        modified_nanos INTEGER NOT NULL,
        reason TEXT NOT NULL
    );
    CREATE TABLE pins (
        path BLOB PRIMARY KEY,
        kind TEXT NOT NULL,
        target BLOB NOT NULL
    );
";

fn query_failed(e: rusqlite::Error) -> StoreError {
    StoreError::QueryFailed(e.to_string())
}

/// Paths are stored as their raw OS bytes so names that are not valid
/// UTF-8 come back unchanged
#[cfg(unix)]
fn path_to_blob(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_blob(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_to_blob(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(unix))]
fn path_from_blob(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// SQLite-backed record store at a fixed path
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    pub fn new(path: &Path) -> Self {
        Self {
            db_path: path.to_path_buf(),
        }
    }

    /// Default location under the user's data directory, one state file
    /// per scan root
    pub fn default_path(root: &Path) -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| Self::state_path_in(&d, root))
    }

    /// `<data>/photo-sorter/<root key>/state.db`, where the key is a digest
    /// of the canonical root
    pub fn state_path_in(data_dir: &Path, root: &Path) -> PathBuf {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let digest = blake3::hash(&path_to_blob(&root)).to_hex();
        data_dir
            .join("photo-sorter")
            .join(&digest.as_str()[..16])
            .join("state.db")
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_read_only(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| StoreError::OpenFailed {
                path: self.db_path.clone(),
                reason: e.to_string(),
            })?;

        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(query_failed)?;
        if version != SCHEMA_VERSION {
            return Err(StoreError::VersionMismatch {
                path: self.db_path.clone(),
                found: version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(conn)
    }

    fn stored_params(conn: &Connection) -> Result<FingerprintParams, StoreError> {
        let grid: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'grid_size'", [], |row| {
                row.get(0)
            })
            .map_err(query_failed)?;
        grid.parse()
            .map(FingerprintParams::new)
            .map_err(|_| StoreError::Corrupted(format!("grid size {:?}", grid)))
    }

    fn load_records(conn: &Connection, table: &mut RecordTable) -> Result<(), StoreError> {
        let params = table.params();
        let mut stmt = conn
            .prepare(
                "SELECT path, size, modified_secs, modified_nanos, width, height,
                        capture_secs, capture_nanos, capture_source, fingerprint, content_hash
                 FROM records",
            )
            .map_err(query_failed)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    path_from_blob(row.get(0)?),
                    stamp(row.get(1)?, row.get(2)?, row.get(3)?),
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    (row.get::<_, i64>(6)?, row.get::<_, i64>(7)?),
                    row.get::<_, String>(8)?,
                    row.get::<_, Vec<u8>>(9)?,
                    row.get::<_, Vec<u8>>(10)?,
                ))
            })
            .map_err(query_failed)?;

        for row in rows {
            let (path, stamp, width, height, (secs, nanos), source, fp, hash) =
                row.map_err(query_failed)?;

            let at = DateTime::from_timestamp(secs, nanos as u32)
                .ok_or_else(|| {
                    StoreError::Corrupted(format!("capture time for {}", path.display()))
                })?
                .naive_utc();
            let source = match source.as_str() {
                "exif" => CaptureSource::Exif,
                "file_modified" => CaptureSource::FileModified,
                other => {
                    return Err(StoreError::Corrupted(format!(
                        "capture source {:?} for {}",
                        other,
                        path.display()
                    )))
                }
            };
            let fingerprint = decode_fingerprint(params, &fp)
                .ok_or_else(|| {
                    StoreError::Corrupted(format!("fingerprint for {}", path.display()))
                })?;
            let content_hash = <[u8; 32]>::try_from(hash.as_slice())
                .map(ContentHash::from_bytes)
                .map_err(|_| {
                    StoreError::Corrupted(format!("content hash for {}", path.display()))
                })?;

            table.insert(ImageRecord {
                path,
                stamp,
                width: width as u32,
                height: height as u32,
                capture: CaptureTime { at, source },
                fingerprint,
                content_hash,
            });
        }
        Ok(())
    }

    fn load_unreadable(conn: &Connection, table: &mut RecordTable) -> Result<(), StoreError> {
        let mut stmt = conn
            .prepare("SELECT path, size, modified_secs, modified_nanos, reason FROM unreadable")
            .map_err(query_failed)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UnreadableFile {
                    path: path_from_blob(row.get(0)?),
                    stamp: stamp(row.get(1)?, row.get(2)?, row.get(3)?),
                    reason: row.get(4)?,
                })
            })
            .map_err(query_failed)?;

        for row in rows {
            table.mark_unreadable(row.map_err(query_failed)?);
        }
        Ok(())
    }

    fn load_pins(conn: &Connection) -> Result<PinnedAssignments, StoreError> {
        let mut stmt = conn
            .prepare("SELECT path, kind, target FROM pins")
            .map_err(query_failed)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    path_from_blob(row.get(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(query_failed)?;

        let mut pins = PinnedAssignments::new();
        for row in rows {
            let (path, kind, target) = row.map_err(query_failed)?;
            let target = match kind.as_str() {
                "record" => PinTarget::WithRecord(path_from_blob(target)),
                "group" => PinTarget::Group(String::from_utf8(target).map_err(|_| {
                    StoreError::Corrupted(format!("pin label for {}", path.display()))
                })?),
                other => return Err(StoreError::Corrupted(format!("pin kind {:?}", other))),
            };
            pins.pin(path, target);
        }
        Ok(pins)
    }

    fn write_all(
        tx: &Transaction<'_>,
        table: &RecordTable,
        pins: &PinnedAssignments,
    ) -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('grid_size', ?)",
            [table.params().grid_size.to_string()],
        )
        .map_err(query_failed)?;

        let mut insert_record = tx
            .prepare(
                "INSERT INTO records
                 (path, size, modified_secs, modified_nanos, width, height,
                  capture_secs, capture_nanos, capture_source, fingerprint, content_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(query_failed)?;
        for record in table.records() {
            let capture = record.capture.at.and_utc();
            insert_record
                .execute(params![
                    path_to_blob(&record.path),
                    record.stamp.size as i64,
                    record.stamp.modified_secs,
                    record.stamp.modified_nanos as i64,
                    record.width as i64,
                    record.height as i64,
                    capture.timestamp(),
                    capture.timestamp_subsec_nanos() as i64,
                    match record.capture.source {
                        CaptureSource::Exif => "exif",
                        CaptureSource::FileModified => "file_modified",
                    },
                    encode_fingerprint(&record.fingerprint),
                    record.content_hash.as_bytes().to_vec(),
                ])
                .map_err(query_failed)?;
        }

        let mut insert_unreadable = tx
            .prepare(
                "INSERT INTO unreadable (path, size, modified_secs, modified_nanos, reason)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .map_err(query_failed)?;
        for entry in table.unreadable() {
            insert_unreadable
                .execute(params![
                    path_to_blob(&entry.path),
                    entry.stamp.size as i64,
                    entry.stamp.modified_secs,
                    entry.stamp.modified_nanos as i64,
                    entry.reason,
                ])
                .map_err(query_failed)?;
        }

        let mut insert_pin = tx
            .prepare("INSERT INTO pins (path, kind, target) VALUES (?, ?, ?)")
            .map_err(query_failed)?;
        for (path, target) in pins.iter() {
            let (kind, value) = match target {
                PinTarget::WithRecord(anchor) => ("record", path_to_blob(anchor)),
                PinTarget::Group(label) => ("group", label.as_bytes().to_vec()),
            };
            insert_pin
                .execute(params![path_to_blob(path), kind, value])
                .map_err(query_failed)?;
        }

        Ok(())
    }
}

fn stamp(size: i64, modified_secs: i64, modified_nanos: i64) -> FileStamp {
    FileStamp {
        size: size as u64,
        modified_secs,
        modified_nanos: modified_nanos as u32,
    }
}

fn encode_fingerprint(fp: &Fingerprint) -> Vec<u8> {
    fp.words().iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn decode_fingerprint(params: FingerprintParams, bytes: &[u8]) -> Option<Fingerprint> {
    if bytes.len() % 8 != 0 {
        return None;
    }
    let words = bytes
        .chunks_exact(8)
        .map(|c| <[u8; 8]>::try_from(c).map(u64::from_be_bytes))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    Fingerprint::from_words(params, words)
}

impl RecordStore for SqliteRecordStore {
    fn load(&self, params: FingerprintParams) -> Result<Snapshot, StoreError> {
        if !self.db_path.exists() {
            return Ok(Snapshot::empty(params));
        }

        let conn = self.open_read_only()?;
        let pins = Self::load_pins(&conn)?;
        let stored = Self::stored_params(&conn)?;

        if stored != params {
            let discarded: i64 = conn
                .query_row(
                    "SELECT (SELECT COUNT(*) FROM records) + (SELECT COUNT(*) FROM unreadable)",
                    [],
                    |row| row.get(0),
                )
                .map_err(query_failed)?;
            tracing::warn!(
                stored = stored.grid_size,
                current = params.grid_size,
                discarded,
                "Saved records use other fingerprint parameters; re-extracting"
            );
            return Ok(Snapshot {
                table: RecordTable::new(params),
                pins,
                discarded: discarded as usize,
            });
        }

        let mut table = RecordTable::new(params);
        Self::load_records(&conn, &mut table)?;
        Self::load_unreadable(&conn, &mut table)?;

        tracing::debug!(
            path = %self.db_path.display(),
            records = table.len(),
            unreadable = table.unreadable_len(),
            "Loaded state"
        );
        Ok(Snapshot {
            table,
            pins,
            discarded: 0,
        })
    }

    fn save(&self, table: &RecordTable, pins: &PinnedAssignments) -> Result<(), StoreError> {
        let persist_failed = |reason: String| StoreError::PersistFailed {
            path: self.db_path.clone(),
            reason,
        };

        let dir = match self.db_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| persist_failed(e.to_string()))?;

        let temp = tempfile::Builder::new()
            .prefix(".state-")
            .suffix(".db")
            .tempfile_in(&dir)
            .map_err(|e| persist_failed(e.to_string()))?;

        {
            let mut conn = Connection::open(temp.path()).map_err(|e| StoreError::OpenFailed {
                path: temp.path().to_path_buf(),
                reason: e.to_string(),
            })?;
            conn.execute_batch(SCHEMA).map_err(query_failed)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(query_failed)?;

            let tx = conn.transaction().map_err(query_failed)?;
            Self::write_all(&tx, table, pins)?;
            tx.commit().map_err(query_failed)?;
            conn.close().map_err(|(_, e)| query_failed(e))?;
        }

        temp.as_file()
            .sync_all()
            .map_err(|e| persist_failed(e.to_string()))?;
        temp.persist(&self.db_path)
            .map_err(|e| persist_failed(e.error.to_string()))?;

        tracing::debug!(
            path = %self.db_path.display(),
            records = table.len(),
            "Saved state"
        );
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.db_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::PersistFailed {
                path: self.db_path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
