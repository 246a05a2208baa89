//! Single-file no-clobber move.

use crate::error::ExecutionError;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// How a file reached its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    /// Hard link at the destination, then the source unlinked
    Linked,
    /// Copied across filesystems, verified, then the source removed
    Copied,
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> ExecutionError + '_ {
    move |e| ExecutionError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Move `source` to `destination` without ever replacing an existing file.
///
/// At every point at least one complete copy exists: the source is only
/// removed once the destination is in place (and, for copies, verified).
pub fn move_no_clobber(source: &Path, destination: &Path) -> Result<MoveMethod, ExecutionError> {
    let source_meta = match fs::symlink_metadata(source) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ExecutionError::SourceMissing {
                path: source.to_path_buf(),
            })
        }
        Err(e) => return Err(io_error(source)(e)),
    };
    if fs::symlink_metadata(destination).is_ok() {
        return Err(ExecutionError::DestinationExists {
            path: destination.to_path_buf(),
        });
    }

    match fs::hard_link(source, destination) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(source) {
                // Leave things as they were
                let _ = fs::remove_file(destination);
                return Err(io_error(source)(e));
            }
            Ok(MoveMethod::Linked)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(ExecutionError::DestinationExists {
                path: destination.to_path_buf(),
            })
        }
        Err(_) => {
            copy_verified(source, destination, source_meta.len())?;
            fs::remove_file(source).map_err(io_error(source))?;
            Ok(MoveMethod::Copied)
        }
    }
}

/// Copy through a temp file next to the destination, check size and
/// digest, then persist without replacing anything.
fn copy_verified(source: &Path, destination: &Path, expected_len: u64) -> Result<(), ExecutionError> {
    let dir = destination.parent().unwrap_or(Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(io_error(destination))?;

    let source_hash = {
        let mut reader = File::open(source).map_err(io_error(source))?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(io_error(source))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            temp.write_all(&buf[..n]).map_err(io_error(destination))?;
        }
        hasher.finalize()
    };
    temp.as_file().sync_all().map_err(io_error(destination))?;

    let written = fs::read(temp.path()).map_err(io_error(destination))?;
    if written.len() as u64 != expected_len {
        return Err(ExecutionError::VerificationFailed {
            path: source.to_path_buf(),
            reason: format!(
                "source {} bytes, copy {} bytes",
                expected_len,
                written.len()
            ),
        });
    }
    if blake3::hash(&written) != source_hash {
        return Err(ExecutionError::VerificationFailed {
            path: source.to_path_buf(),
            reason: "content digest differs".to_string(),
        });
    }

    temp.persist_noclobber(destination).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            ExecutionError::DestinationExists {
                path: destination.to_path_buf(),
            }
        } else {
            io_error(destination)(e.error)
        }
    })?;
    Ok(())
}
