//! Side-car persistence for the similarity index
//!
//! The index is written next to the database as `{db_stem}.index`:
//! zstd-compressed bincode of the format version, the table fingerprint it
//! was built from, and the index snapshot.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::VectorStoreError;
use crate::embedding::IndexSnapshot;

pub const FORMAT_VERSION: u32 = 1;
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    format_version: u32,
    fingerprint: &'a str,
    snapshot: &'a IndexSnapshot,
}

/// Decoded side-car file
#[derive(Debug, Deserialize)]
pub struct SnapshotFile {
    pub format_version: u32,
    pub fingerprint: String,
    pub snapshot: IndexSnapshot,
}

/// Side-car path for a database file
pub fn index_path(db_path: &Path) -> PathBuf {
    db_path.with_extension("index")
}

/// Write the snapshot atomically (temp file, fsync, rename)
pub fn save(path: &Path, fingerprint: &str, snapshot: &IndexSnapshot) -> Result<(), VectorStoreError> {
    let encoded = bincode::serialize(&SnapshotFileRef {
        format_version: FORMAT_VERSION,
        fingerprint,
        snapshot,
    })
    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;

    let compressed =
        zstd::encode_all(&encoded[..], COMPRESSION_LEVEL).map_err(|e| VectorStoreError::Io {
            source: e,
            context: "Failed to compress index snapshot".to_string(),
        })?;

    let temp_path = path.with_extension("index.tmp");
    let mut file = fs::File::create(&temp_path).map_err(|e| VectorStoreError::Io {
        source: e,
        context: format!("Failed to create temp index file: {}", temp_path.display()),
    })?;
    file.write_all(&compressed).map_err(|e| VectorStoreError::Io {
        source: e,
        context: format!("Failed to write index snapshot: {}", temp_path.display()),
    })?;
    file.sync_all().map_err(|e| VectorStoreError::Io {
        source: e,
        context: format!("Failed to sync index file: {}", temp_path.display()),
    })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| VectorStoreError::Io {
        source: e,
        context: format!(
            "Failed to rename temp index to final location: {} -> {}",
            temp_path.display(),
            path.display()
        ),
    })?;

    Ok(())
}

/// Read the side-car file. `Ok(None)` when it does not exist; an error when
/// it exists but cannot be decoded.
pub fn load(path: &Path) -> Result<Option<SnapshotFile>, VectorStoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(VectorStoreError::Io {
                source: e,
                context: format!("Failed to read index file: {}", path.display()),
            })
        }
    };

    let decoded = zstd::decode_all(&data[..]).map_err(|e| VectorStoreError::Io {
        source: e,
        context: format!("Failed to decompress index file: {}", path.display()),
    })?;

    let file: SnapshotFile = bincode::deserialize(&decoded)
        .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;

    if file.format_version != FORMAT_VERSION {
        return Err(VectorStoreError::Serialization(format!(
            "unsupported index format version {} (expected {})",
            file.format_version, FORMAT_VERSION
        )));
    }

    Ok(Some(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{FlatIndex, SimilarityIndex};
    use tempfile::TempDir;

    #[test]
    fn test_index_path() {
        assert_eq!(
            index_path(Path::new("/data/vectors.db")),
            PathBuf::from("/data/vectors.index")
        );
        assert_eq!(
            index_path(Path::new("/data/vectors")),
            PathBuf::from("/data/vectors.index")
        );
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.index");

        let mut index = FlatIndex::new(3);
        index
            .add_with_ids(&[4, 8], &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]])
            .unwrap();
        save(&path, "abc123", &index.snapshot()).unwrap();
        assert!(!path.with_extension("index.tmp").exists());

        let file = load(&path).unwrap().unwrap();
        assert_eq!(file.fingerprint, "abc123");
        assert_eq!(file.snapshot.dimension(), 3);
        match file.snapshot {
            IndexSnapshot::Flat { ids, .. } => assert_eq!(ids, vec![4, 8]),
            other => panic!("unexpected snapshot {:?}", other.kind()),
        }
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(load(&temp.path().join("absent.index")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.index");
        fs::write(&path, b"definitely not zstd").unwrap();
        assert!(load(&path).is_err());
    }
}
