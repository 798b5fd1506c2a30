use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::error::{Error, Result};
use crate::core::types::{Document, DocumentId};
use crate::schema::mappings::Mappings;
use crate::shard::shard::{Shard, ShardCaps, TokenCache};

/// A write routed to one shard's worker.
enum WriteOp {
    Put {
        doc: Document,
        seq: u64,
        reply: Sender<Result<()>>,
    },
    Delete {
        id: DocumentId,
        reply: Sender<bool>,
    },
}

/// Single-writer ingest worker for one shard.
///
/// All writes for the shard serialize onto its bounded queue, giving total
/// write order per shard and backpressure when producers outrun indexing.
/// Dropping the worker closes the queue and joins the thread.
pub struct ShardWorker {
    sender: Option<Sender<WriteOp>>,
    handle: Option<JoinHandle<()>>,
}

impl ShardWorker {
    pub fn spawn(
        shard: Arc<Shard>,
        mappings: Arc<RwLock<Mappings>>,
        analyzers: Arc<AnalyzerRegistry>,
        caps: ShardCaps,
        queue_size: usize,
        token_cache_entries: usize,
    ) -> Self {
        let (sender, receiver) = bounded(queue_size.max(1));
        let shard_id = shard.id;
        let handle = std::thread::Builder::new()
            .name(format!("kestrel-shard-{}", shard_id))
            .spawn(move || {
                Self::run(receiver, shard, mappings, analyzers, caps, token_cache_entries);
            })
            .expect("failed to spawn shard worker thread");
        ShardWorker {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    fn run(
        receiver: Receiver<WriteOp>,
        shard: Arc<Shard>,
        mappings: Arc<RwLock<Mappings>>,
        analyzers: Arc<AnalyzerRegistry>,
        caps: ShardCaps,
        token_cache_entries: usize,
    ) {
        let mut token_cache = TokenCache::new(token_cache_entries);
        while let Ok(op) = receiver.recv() {
            match op {
                WriteOp::Put { doc, seq, reply } => {
                    let mappings = mappings.read();
                    let result =
                        shard.apply_put(doc, seq, &mappings, &analyzers, caps, &mut token_cache);
                    drop(mappings);
                    let _ = reply.send(result);
                }
                WriteOp::Delete { id, reply } => {
                    let _ = reply.send(shard.apply_delete(&id));
                }
            }
        }
    }

    /// Enqueue an upsert and wait for the per-document outcome. Blocks when
    /// the shard's queue is full.
    pub fn put(&self, doc: Document, seq: u64) -> Result<()> {
        let (reply, response) = bounded(1);
        self.sender
            .as_ref()
            .ok_or_else(|| Error::Internal("shard worker stopped".to_string()))?
            .send(WriteOp::Put { doc, seq, reply })
            .map_err(|_| Error::Internal("shard worker queue closed".to_string()))?;
        response
            .recv()
            .map_err(|_| Error::Internal("shard worker dropped reply".to_string()))?
    }

    /// Enqueue a delete; returns whether the shard held the document.
    pub fn delete(&self, id: DocumentId) -> Result<bool> {
        let (reply, response) = bounded(1);
        self.sender
            .as_ref()
            .ok_or_else(|| Error::Internal("shard worker stopped".to_string()))?
            .send(WriteOp::Delete { id, reply })
            .map_err(|_| Error::Internal("shard worker queue closed".to_string()))?;
        response
            .recv()
            .map_err(|_| Error::Internal("shard worker dropped reply".to_string()))
    }
}

impl Drop for ShardWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
