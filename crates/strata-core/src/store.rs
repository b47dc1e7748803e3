//! Chunk payload persistence and the FIFO read cache.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::ChunkId;
use crate::codec::Codec;
use crate::error::Result;

/// Write one chunk payload through the configured codec.
pub fn write_chunk(path: &Path, data: &[u8], codec: Codec) -> Result<()> {
    let encoded = codec.encode(data)?;
    fs::write(path, encoded)?;
    Ok(())
}

/// Bounded FIFO cache of decoded chunk payloads.
///
/// Newly stored chunks are inserted by the matcher before their payload
/// reaches disk, so similarity lookups against chunks created moments ago
/// never read the filesystem.
#[derive(Debug)]
pub struct FifoCache {
    capacity: usize,
    order: VecDeque<ChunkId>,
    entries: HashMap<ChunkId, Arc<[u8]>>,
}

impl FifoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, id: &ChunkId) -> Option<Arc<[u8]>> {
        self.entries.get(id).cloned()
    }

    pub fn insert(&mut self, id: ChunkId, data: Arc<[u8]>) {
        if self.entries.insert(id, data).is_some() {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
