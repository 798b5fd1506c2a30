use chrono::{DateTime, Utc};
use crossbeam::channel::{Sender, bounded, tick};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::index::posting::PostingList;
use crate::schema::mappings::Mappings;
use crate::storage::compress::{CompressedBlock, CompressionType};
use crate::storage::layout::StorageLayout;

/// One stored document inside a snapshot blob.
#[derive(Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub internal: u32,
    pub doc: Document,
    pub length: u32,
    pub seq: u64,
}

/// Full state of one shard: documents, postings, facet index.
///
/// Self-sufficient; restoring it reproduces a functionally equivalent
/// shard without re-analysis.
#[derive(Serialize, Deserialize)]
pub struct SnapshotShardState {
    pub documents: Vec<SnapshotDoc>,
    pub postings: HashMap<String, HashMap<String, PostingList>>,
    pub facet_values: HashMap<String, HashMap<String, Vec<u32>>>,
    pub facet_paths: HashMap<String, Vec<u32>>,
    pub next_internal: u32,
}

/// Shard layout recorded with a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardLayoutMeta {
    pub num_shards: usize,
    pub replication_factor: usize,
    pub strategy: String,
}

/// Everything needed to rebuild one index.
pub struct IndexSnapshotState {
    pub mappings: Mappings,
    pub layout: ShardLayoutMeta,
    pub shards: Vec<SnapshotShardState>,
    pub next_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    pub file: String,
    pub checksum: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: String,
    /// Monotonic across all snapshots of this manager.
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub index: String,
    pub tags: Vec<String>,
    /// Combined checksum over the per-blob checksums.
    pub checksum: u32,
    pub shard_layout: ShardLayoutMeta,
    pub blobs: Vec<BlobMeta>,
    pub mappings: Mappings,
    pub next_seq: u64,
    pub compression: CompressionType,
}

#[derive(Serialize, Deserialize, Default)]
struct SnapshotCatalog {
    next_version: u64,
    snapshots: Vec<SnapshotMetadata>,
}

/// Filter for snapshot listings.
#[derive(Debug, Default, Clone)]
pub struct SnapshotFilter {
    pub index: Option<String>,
    pub tag: Option<String>,
}

/// Creates, lists, restores and prunes snapshots on the filesystem.
pub struct SnapshotManager {
    layout: StorageLayout,
    catalog: Mutex<SnapshotCatalog>,
    compression: CompressionType,
    max_snapshots: usize,
}

impl SnapshotManager {
    pub fn new(
        data_dir: std::path::PathBuf,
        compression: CompressionType,
        max_snapshots: usize,
    ) -> Result<Self> {
        let layout = StorageLayout::new(data_dir)?;
        let catalog = Self::load_catalog(&layout)?;
        Ok(SnapshotManager {
            layout,
            catalog: Mutex::new(catalog),
            compression,
            max_snapshots: max_snapshots.max(1),
        })
    }

    fn load_catalog(layout: &StorageLayout) -> Result<SnapshotCatalog> {
        let path = layout.catalog_path();
        if !path.exists() {
            return Ok(SnapshotCatalog::default());
        }
        let data = fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn save_catalog(&self, catalog: &SnapshotCatalog) -> Result<()> {
        let data = serde_json::to_vec_pretty(catalog)?;
        write_atomic(&self.layout.catalog_path(), &data)?;
        Ok(())
    }

    /// Persist one index's state as a new snapshot, then apply retention.
    pub fn create(
        &self,
        index: &str,
        state: &IndexSnapshotState,
        tags: Vec<String>,
    ) -> Result<SnapshotMetadata> {
        let id = Uuid::new_v4().to_string();
        self.layout.ensure_snapshot_dir(&id)?;

        let mut blobs = Vec::with_capacity(state.shards.len());
        let mut combined = crc32fast::Hasher::new();
        for (shard_id, shard_state) in state.shards.iter().enumerate() {
            let raw = bincode::serialize(shard_state)?;
            let block = CompressedBlock::compress(&raw, self.compression)?;
            let bytes = bincode::serialize(&block)?;
            let checksum = crc32fast::hash(&bytes);
            combined.update(&checksum.to_le_bytes());

            let file = StorageLayout::blob_name(index, shard_id);
            write_atomic(&self.layout.blob_path(&id, &file), &bytes)?;
            blobs.push(BlobMeta { file, checksum });
        }

        let metadata = {
            let mut catalog = self.catalog.lock();
            let metadata = SnapshotMetadata {
                id: id.clone(),
                version: catalog.next_version,
                timestamp: Utc::now(),
                index: index.to_string(),
                tags,
                checksum: combined.finalize(),
                shard_layout: state.layout.clone(),
                blobs,
                mappings: state.mappings.clone(),
                next_seq: state.next_seq,
                compression: self.compression,
            };
            catalog.next_version += 1;
            catalog.snapshots.push(metadata.clone());
            self.enforce_retention(&mut catalog)?;
            self.save_catalog(&catalog)?;
            metadata
        };

        let meta_json = serde_json::to_vec_pretty(&metadata)?;
        write_atomic(&self.layout.snapshot_metadata_path(&id), &meta_json)?;

        info!(snapshot = %id, index, version = metadata.version, "snapshot created");
        Ok(metadata)
    }

    /// Keep the newest `max_snapshots`; delete the rest.
    fn enforce_retention(&self, catalog: &mut SnapshotCatalog) -> Result<()> {
        while catalog.snapshots.len() > self.max_snapshots {
            let oldest_idx = catalog
                .snapshots
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.version)
                .map(|(i, _)| i)
                .expect("non-empty");
            let removed = catalog.snapshots.remove(oldest_idx);
            self.layout.remove_snapshot_dir(&removed.id)?;
            info!(snapshot = %removed.id, "snapshot pruned by retention");
        }
        Ok(())
    }

    pub fn list(&self, filter: &SnapshotFilter) -> Vec<SnapshotMetadata> {
        let catalog = self.catalog.lock();
        let mut snapshots: Vec<SnapshotMetadata> = catalog
            .snapshots
            .iter()
            .filter(|s| {
                filter.index.as_ref().is_none_or(|index| &s.index == index)
                    && filter.tag.as_ref().is_none_or(|tag| s.tags.contains(tag))
            })
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.version);
        snapshots
    }

    pub fn get(&self, id: &str) -> Result<SnapshotMetadata> {
        self.catalog
            .lock()
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| Error::UnknownSnapshot(id.to_string()))
    }

    /// Read a snapshot back, verifying every blob checksum before decoding.
    pub fn load(&self, id: &str) -> Result<(SnapshotMetadata, IndexSnapshotState)> {
        let metadata = self.get(id)?;

        let mut shards = Vec::with_capacity(metadata.blobs.len());
        for blob in &metadata.blobs {
            let bytes = fs::read(self.layout.blob_path(id, &blob.file))?;
            let checksum = crc32fast::hash(&bytes);
            if checksum != blob.checksum {
                return Err(Error::SnapshotIntegrity(format!(
                    "blob `{}` checksum mismatch (expected {:08x}, got {:08x})",
                    blob.file, blob.checksum, checksum
                )));
            }
            let block: CompressedBlock = bincode::deserialize(&bytes)?;
            let raw = block.decompress()?;
            shards.push(bincode::deserialize::<SnapshotShardState>(&raw)?);
        }

        let state = IndexSnapshotState {
            mappings: metadata.mappings.clone(),
            layout: metadata.shard_layout.clone(),
            shards,
            next_seq: metadata.next_seq,
        };
        Ok((metadata, state))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut catalog = self.catalog.lock();
        let before = catalog.snapshots.len();
        catalog.snapshots.retain(|s| s.id != id);
        if catalog.snapshots.len() == before {
            return Err(Error::UnknownSnapshot(id.to_string()));
        }
        self.layout.remove_snapshot_dir(id)?;
        self.save_catalog(&catalog)?;
        info!(snapshot = %id, "snapshot deleted");
        Ok(())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent directory for {:?}", path)))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path)
        .map_err(|e| Error::Internal(format!("failed to persist {:?}: {}", path, e)))?;
    Ok(())
}

/// Periodic snapshot loop; errors invoke the task's own handling and
/// scheduling continues.
pub struct SnapshotScheduler {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotScheduler {
    pub fn start<F>(interval: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let handle = std::thread::Builder::new()
            .name("kestrel-snapshots".to_string())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(ticker) -> _ => {
                            if let Err(e) = task() {
                                warn!(error = %e, "scheduled snapshot failed");
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn snapshot scheduler");
        SnapshotScheduler {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
