use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::config::ShardStrategy;
use crate::core::types::DocumentId;

/// Stable 32-bit FNV-1a.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Maps document ids to shard slots.
pub struct ShardRouter {
    strategy: ShardStrategy,
    num_shards: usize,
    replication: usize,
    round_robin: AtomicUsize,
}

impl ShardRouter {
    pub fn new(strategy: ShardStrategy, num_shards: usize, replication: usize) -> Self {
        let num_shards = num_shards.max(1);
        ShardRouter {
            strategy,
            num_shards,
            replication: replication.clamp(1, num_shards),
            round_robin: AtomicUsize::new(0),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    pub fn replication(&self) -> usize {
        self.replication
    }

    pub fn primary(&self, id: &DocumentId) -> usize {
        match &self.strategy {
            ShardStrategy::Hash => fnv1a_hash(id.as_str().as_bytes()) as usize % self.num_shards,
            ShardStrategy::RoundRobin => {
                self.round_robin.fetch_add(1, Ordering::Relaxed) % self.num_shards
            }
            ShardStrategy::Range => {
                let first = id.as_str().bytes().next().unwrap_or(0) as usize;
                (first * self.num_shards) / 256
            }
            ShardStrategy::Custom(f) => f(id.as_str(), self.num_shards) % self.num_shards,
        }
    }

    /// Primary plus the following `replication - 1` slots, wrapping.
    pub fn replicas(&self, id: &DocumentId) -> Vec<usize> {
        let primary = self.primary(id);
        (0..self.replication)
            .map(|offset| (primary + offset) % self.num_shards)
            .collect()
    }
}
