use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::Result;

/// Directory structure for persisted snapshots.
///
/// One directory per snapshot holds `metadata.json` plus one blob per
/// (index, shard); a top-level catalog records all known snapshot ids.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
    pub snapshots_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let snapshots_dir = base_dir.join("snapshots");
        fs::create_dir_all(&snapshots_dir)?;
        Ok(StorageLayout {
            base_dir,
            snapshots_dir,
        })
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.snapshots_dir.join("metadata.json")
    }

    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.snapshots_dir.join(id)
    }

    pub fn snapshot_metadata_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir(id).join("metadata.json")
    }

    pub fn blob_path(&self, id: &str, blob: &str) -> PathBuf {
        self.snapshot_dir(id).join(blob)
    }

    pub fn blob_name(index: &str, shard: usize) -> String {
        format!("{}_shard{}.blob", index, shard)
    }

    pub fn ensure_snapshot_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.snapshot_dir(id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn remove_snapshot_dir(&self, id: &str) -> Result<()> {
        let dir = self.snapshot_dir(id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }
}
