//! Atomic record persistence
//!
//! Every record is written to a temporary file in the destination
//! directory and renamed over the target, so a reader sees either the
//! previous record or the new one, never a partial write.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `bytes` atomically, creating parent directories
///
/// # Errors
/// Returns [`StoreError::Io`] on any filesystem failure
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Replace `path` with the pretty JSON encoding of `value`
///
/// # Errors
/// Returns [`StoreError::Json`] if encoding fails, otherwise as [`write_bytes`]
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes(path, &bytes)
}

/// Replace `path` with the TOML encoding of `value`
///
/// # Errors
/// Returns [`StoreError::TomlEncode`] if encoding fails, otherwise as [`write_bytes`]
pub fn write_toml<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let text = toml::to_string_pretty(value).map_err(|source| StoreError::TomlEncode {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes(path, text.as_bytes())
}

/// Read raw bytes, `None` if the file does not exist
///
/// # Errors
/// Returns [`StoreError::Io`] for failures other than not-found
pub fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Read a JSON record, `None` if the file does not exist
///
/// # Errors
/// Returns [`StoreError::Json`] for malformed records
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let Some(bytes) = read_bytes(path)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Read a TOML record, `None` if the file does not exist
///
/// # Errors
/// Returns [`StoreError::TomlDecode`] for malformed records
pub fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let Some(bytes) = read_bytes(path)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    toml::from_str(&text)
        .map(Some)
        .map_err(|source| StoreError::TomlDecode {
            path: path.to_path_buf(),
            source,
        })
}

/// Append one JSON line to a log file
///
/// Logs are append-only diagnostics; a torn final line is tolerated by
/// readers.
///
/// # Errors
/// Returns [`StoreError`] on encoding or filesystem failure
pub fn append_json_line<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut line = serde_json::to_vec(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    line.push(b'\n');
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(&line).map_err(|e| StoreError::io(path, e))
}

/// Remove a directory tree if present
///
/// # Errors
/// Returns [`StoreError::Io`] for failures other than not-found
pub fn remove_dir(path: &Path) -> Result<(), StoreError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Move the fully written `staging` directory to `target`
///
/// An existing `target` is set aside first and only removed once
/// `staging` is in place; if the move fails it is put back.
///
/// # Errors
/// Returns [`StoreError::Io`] on any filesystem failure
pub fn replace_dir(staging: &Path, target: &Path) -> Result<(), StoreError> {
    restore_dir(target)?;
    let previous = previous_path(target);
    remove_dir(&previous)?;

    let had_previous = match fs::rename(target, &previous) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(StoreError::io(target, e)),
    };
    if let Err(e) = fs::rename(staging, target) {
        if had_previous {
            fs::rename(&previous, target).map_err(|e| StoreError::io(&previous, e))?;
        }
        return Err(StoreError::io(staging, e));
    }
    remove_dir(&previous)
}

/// Put back a directory left aside by an interrupted [`replace_dir`]
///
/// Returns true if one was restored.
///
/// # Errors
/// Returns [`StoreError::Io`] if the rename fails
pub fn restore_dir(target: &Path) -> Result<bool, StoreError> {
    let previous = previous_path(target);
    if target.exists() || !previous.is_dir() {
        return Ok(false);
    }
    fs::rename(&previous, target).map_err(|e| StoreError::io(&previous, e))?;
    Ok(true)
}

fn previous_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.previous"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Details {
        title: String,
        agencies: Vec<String>,
    }

    #[test]
    fn json_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/record.json");
        let value = Details {
            title: "Pesticide tolerances".to_string(),
            agencies: vec!["Environmental Protection Agency".to_string()],
        };
        write_json(&path, &value).unwrap();
        assert_eq!(read_json::<Details>(&path).unwrap(), Some(value));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_json::<Details>(&dir.path().join("absent.json"))
            .unwrap()
            .is_none());
        assert!(read_toml::<Details>(&dir.path().join("absent.toml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_bytes(&path, b"first").unwrap();
        write_bytes(&path, b"second").unwrap();
        assert_eq!(read_bytes(&path).unwrap().unwrap(), b"second");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.toml");
        let value = Details {
            title: "Rule".to_string(),
            agencies: vec![],
        };
        write_toml(&path, &value).unwrap();
        assert_eq!(read_toml::<Details>(&path).unwrap(), Some(value));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        write_bytes(&path, b"{not json").unwrap();
        assert!(matches!(
            read_json::<Details>(&path),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn log_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_json_line(&path, &serde_json::json!({"event": "a"})).unwrap();
        append_json_line(&path, &serde_json::json!({"event": "b"})).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn replace_dir_swaps_whole_trees() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2024-12-30");
        let staging = dir.path().join(".2024-12-30.staging");

        write_bytes(&target.join("old.json"), b"old").unwrap();
        write_bytes(&staging.join("new.json"), b"new").unwrap();
        replace_dir(&staging, &target).unwrap();

        assert!(!staging.exists());
        assert!(!target.join("old.json").exists());
        assert_eq!(read_bytes(&target.join("new.json")).unwrap(), Some(b"new".to_vec()));
        assert!(!dir.path().join(".2024-12-30.previous").exists());
    }

    #[test]
    fn interrupted_replace_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2024-12-30");
        let previous = dir.path().join(".2024-12-30.previous");
        write_bytes(&previous.join("manifest.json"), b"{}").unwrap();

        assert!(restore_dir(&target).unwrap());
        assert!(target.join("manifest.json").is_file());
        assert!(!previous.exists());
        assert!(!restore_dir(&target).unwrap());
    }

    #[test]
    fn failed_replace_keeps_the_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2024-12-30");
        write_bytes(&target.join("manifest.json"), b"{}").unwrap();

        assert!(replace_dir(&dir.path().join("missing"), &target).is_err());
        assert!(target.join("manifest.json").is_file());
    }
}
