//! Artifact files on disk, indexed by result rows
//!
//! Accepted images land under `<root>/<site>/<board>/<hash-prefix>.<ext>`.
//! The row in the `results` table stays the authority on whether a task was
//! processed; the file is only the payload.

use crate::ledger::CheckpointKey;
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::{ArtifactBytes, ResultRecord, ResultStore, StorageResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Number of hex characters of the content hash used as file name
const FILE_STEM_LEN: usize = 16;

/// Result store that writes artifact files next to its rows
pub struct ArtifactStore {
    root: PathBuf,
    rows: SqliteStorage,
}

impl ArtifactStore {
    /// Creates a store writing files under `root`
    pub fn new(root: impl Into<PathBuf>, rows: SqliteStorage) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, rows })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the artifacts of one target
    pub fn target_dir(&self, key: &CheckpointKey) -> PathBuf {
        self.root
            .join(sanitize_component(&key.site))
            .join(sanitize_component(&key.board))
    }

    /// Underlying row storage
    pub fn rows(&self) -> &SqliteStorage {
        &self.rows
    }

    fn write_file(&self, record: &ResultRecord, artifact: ArtifactBytes<'_>) -> StorageResult<PathBuf> {
        let hash = match &record.content_hash {
            Some(hash) => hash.clone(),
            None => hex::encode(Sha256::digest(artifact.bytes)),
        };
        let stem: String = hash.chars().take(FILE_STEM_LEN).collect();
        let extension = sanitize_component(artifact.extension.trim_start_matches('.'));

        let dir = self
            .root
            .join(sanitize_component(&record.site))
            .join(sanitize_component(&record.board));
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.{}", stem, extension));
        if path.exists() {
            return Ok(path);
        }

        // Write-then-rename so a crash never leaves a truncated artifact
        let partial = dir.join(format!("{}.{}.part", stem, extension));
        fs::write(&partial, artifact.bytes)?;
        fs::rename(&partial, &path)?;

        Ok(path)
    }
}

impl ResultStore for ArtifactStore {
    fn exists(&self, task_key: &str) -> StorageResult<bool> {
        ResultStore::exists(&self.rows, task_key)
    }

    fn save(
        &mut self,
        mut record: ResultRecord,
        artifact: Option<ArtifactBytes<'_>>,
    ) -> StorageResult<ResultRecord> {
        if let Some(artifact) = artifact {
            let path = self.write_file(&record, artifact)?;
            record.file_path = Some(path.to_string_lossy().into_owned());
            record.byte_len = Some(artifact.bytes.len() as u64);
        }
        self.rows.save(record, None)
    }

    fn count(&self) -> StorageResult<u64> {
        self.rows.count()
    }

    fn task_keys(&self) -> StorageResult<Vec<String>> {
        self.rows.task_keys()
    }
}

/// Makes a site, board or extension safe to use as a single path component
fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path().join("downloads"), SqliteStorage::new_in_memory().unwrap())
            .unwrap()
    }

    #[test]
    fn test_save_writes_file_and_row() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let key = CheckpointKey::new("bbs.example.com:8080", "gallery");

        let record = ResultRecord::new("https://bbs.example.com/1.jpg", &key);
        let saved = store
            .save(
                record,
                Some(ArtifactBytes {
                    bytes: b"jpeg bytes",
                    extension: "jpg",
                }),
            )
            .unwrap();

        let path = PathBuf::from(saved.file_path.unwrap());
        assert!(path.starts_with(store.target_dir(&key)));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(fs::read(&path).unwrap(), b"jpeg bytes");
        assert_eq!(saved.byte_len, Some(10));
        assert!(ResultStore::exists(&store, "https://bbs.example.com/1.jpg").unwrap());
    }

    #[test]
    fn test_save_without_artifact_only_writes_row() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let key = CheckpointKey::new("bbs.example.com", "gallery");

        let saved = store.save(ResultRecord::new("item-1", &key), None).unwrap();

        assert!(saved.file_path.is_none());
        assert_eq!(store.count().unwrap(), 1);
        assert!(!store.target_dir(&key).exists());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("bbs.example.com:8080"), "bbs.example.com_8080");
        assert_eq!(sanitize_component("../etc"), "_etc");
        assert_eq!(sanitize_component(""), "_");
    }
}
