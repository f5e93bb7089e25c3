//! Crash-safe file writes and JSON load/save.
//!
//! Weights, optimizer state, the metrics history and the checkpoint manifest
//! all go through these helpers. A file is first written and synced under a
//! `<name>.tmp` sibling, then renamed over the target, so readers only ever
//! see the old contents or the new ones. The sibling is removed again if
//! either step fails.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Serialize `data` as JSON and write it with [`atomic_write`].
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec(data).map_err(io::Error::other)?;
    atomic_write(path, &json)
}

/// Replace `path` with `data`, creating parent directories as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);
    let result = write_synced(&tmp, data).and_then(|()| fs::rename(&tmp, path));
    if let Err(err) = result {
        if let Err(cleanup) = fs::remove_file(&tmp)
            && cleanup.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %tmp.display(), error = %cleanup, "Could not remove temp file");
        }
        return Err(err);
    }
    Ok(())
}

/// `weights.json` -> `weights.json.tmp`; the full name is kept so files that
/// differ only by extension never share a temp file.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Read JSON written by [`atomic_write_json`].
///
/// `Ok(None)` when the file does not exist; corrupt contents are
/// `InvalidData` naming the file.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    serde_json::from_slice(&data).map(Some).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {e}", path.display()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Slot {
        name: String,
        values: Vec<f32>,
    }

    #[test]
    fn test_atomic_write_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("slot.json");

        let data = Slot {
            name: "fc.weight".into(),
            values: vec![0.1, -2.5, 3.0e-7],
        };

        atomic_write_json(&path, &data).unwrap();
        let loaded: Option<Slot> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(data));
        assert!(!tmp_sibling(&path).exists());
    }

    #[test]
    fn test_tmp_sibling_keeps_extension() {
        let dir = Path::new("/work/checkpoints");
        assert_eq!(
            tmp_sibling(&dir.join("weights.json")),
            dir.join("weights.json.tmp")
        );
        assert_ne!(
            tmp_sibling(&dir.join("state.json")),
            tmp_sibling(&dir.join("state.bin"))
        );
    }

    #[test]
    fn test_failed_rename_removes_tmp() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory at the target makes the rename fail.
        let path = dir.path().join("slot.json");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("occupied"), b"x").unwrap();

        assert!(atomic_write(&path, b"{}").is_err());
        assert!(!tmp_sibling(&path).exists());
        assert!(path.join("occupied").exists());
    }

    #[test]
    fn test_load_json_missing_file() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Slot> = load_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_json_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        atomic_write(&path, b"{not json").unwrap();
        let err = load_json::<Slot>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("bad.json"));
    }
}
