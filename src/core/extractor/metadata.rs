//! Capture time from EXIF metadata.
//!
//! `DateTimeOriginal` is preferred, then `DateTime`. A file without either
//! (or with an unparsable value) falls back to its modification time, and
//! the fallback is recorded so the plan can flag it.

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Where a capture timestamp came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// EXIF DateTimeOriginal / DateTime
    Exif,
    /// No usable metadata; the file modification time was used
    FileModified,
}

/// Capture timestamp with its provenance.
///
/// EXIF times carry no zone, so both sources are kept as naive times
/// (modification times are converted to UTC first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTime {
    pub at: NaiveDateTime,
    pub source: CaptureSource,
}

impl CaptureTime {
    pub fn is_fallback(&self) -> bool {
        self.source == CaptureSource::FileModified
    }
}

/// Read the EXIF capture time from in-memory file bytes
pub fn exif_capture_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;

    [Tag::DateTimeOriginal, Tag::DateTime]
        .iter()
        .find_map(|tag| {
            let field = exif.get_field(*tag, In::PRIMARY)?;
            match field.value {
                Value::Ascii(ref vec) => vec.first().and_then(|raw| parse_exif_datetime(raw)),
                _ => None,
            }
        })
}

/// EXIF date format: "YYYY:MM:DD HH:MM:SS"
fn parse_exif_datetime(raw: &[u8]) -> Option<NaiveDateTime> {
    let text = std::str::from_utf8(raw).ok()?.trim_end_matches('\0').trim();
    NaiveDateTime::parse_from_str(text, "%Y:%m:%d %H:%M:%S").ok()
}

/// Capture time from metadata, or the modification time flagged as fallback
pub fn resolve_capture_time(bytes: &[u8], modified: DateTime<Utc>) -> CaptureTime {
    match exif_capture_time(bytes) {
        Some(at) => CaptureTime {
            at,
            source: CaptureSource::Exif,
        },
        None => CaptureTime {
            at: modified.naive_utc(),
            source: CaptureSource::FileModified,
        },
    }
}
