//! The stream matcher: a byte-level state machine that turns the
//! concatenated source stream into a recipe.
//!
//! The matcher keeps a sliding buffer of one to two chunks of recent bytes
//! and a rolling hash over its last `chunk_size` bytes. A fingerprint hit
//! means the window is an exact duplicate of a stored chunk; everything
//! before the window is unmatched content that gets delta-encoded against a
//! resembling chunk or stored anew. New chunks flow to the storage worker
//! through a bounded queue, so disk pressure throttles matching.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::chunk::{chunk_file_name, Chunk, ChunkId};
use crate::codec::Codec;
use crate::error::{Result, StrataError};
use crate::index::HashRecord;
use crate::repo::{Repository, CHUNKS_DIR, HASHES_NAME};
use crate::sketch;
use crate::store;

/// Capacity of the queue between the matcher and the storage worker.
pub(crate) const STORE_QUEUE_DEPTH: usize = 10;

/// One newly created chunk on its way to disk.
pub(crate) struct ChunkData {
    pub hashes: HashRecord,
    pub content: Arc<[u8]>,
    pub id: ChunkId,
}

/// Drain the store queue in FIFO order: append each chunk's hash record,
/// then write its payload. Queue order is id order, so the hashes file is
/// loadable by position.
pub(crate) fn storage_worker(
    version_dir: &Path,
    codec: Codec,
    queue: Receiver<ChunkData>,
) -> Result<()> {
    let mut hashes = BufWriter::new(File::create(version_dir.join(HASHES_NAME))?);
    for data in queue {
        crate::index::write_record(&mut hashes, &data.hashes)?;
        let path = version_dir.join(CHUNKS_DIR).join(chunk_file_name(data.id.index));
        store::write_chunk(&path, &data.content, codec)?;
        debug!(id = %data.id, bytes = data.content.len(), "stored chunk");
    }
    hashes.flush()?;
    Ok(())
}

impl Repository {
    /// Consume the stream and produce the recipe for `version`, emitting
    /// newly stored chunks to the storage worker as a side effect. Returns
    /// the recipe and the number of chunks stored.
    pub(crate) fn match_stream<R: Read>(
        &mut self,
        stream: R,
        version: u32,
        store_tx: &Sender<ChunkData>,
    ) -> Result<(Vec<Chunk>, u64)> {
        let chunk_size = self.params.chunk_size;
        let mut reader = BufReader::new(stream);
        let mut recipe: Vec<Chunk> = Vec::new();
        let mut buff: Vec<u8> = Vec::with_capacity(chunk_size * 2);

        read_full(&mut reader, &mut buff, chunk_size)?;
        if buff.len() < chunk_size {
            // The whole stream fits in less than one chunk.
            if !buff.is_empty() {
                recipe.push(Chunk::Temp(buff));
            }
            return Ok((recipe, 0));
        }

        let mut hasher = crate::rolling::RollingHash::new(self.pol);
        hasher.write(&buff);

        // Held-back chunk of exactly chunk_size bytes, kept for a possible
        // merge with the next unmatched region.
        let mut prev: Option<Vec<u8>> = None;
        let mut last: u64 = 0;
        let mut eof = false;

        while !eof {
            let fingerprint = hasher.sum();
            if let Some(id) = self.fingerprints.get(fingerprint) {
                // The window (the last chunk_size bytes of the buffer) is
                // an exact duplicate; anything before it is unmatched.
                if buff.len() > chunk_size {
                    let temp = buff[..buff.len() - chunk_size].to_vec();
                    let encoded =
                        self.encode_temp_chunks(prev.take(), temp, version, &mut last, store_tx)?;
                    recipe.extend(encoded);
                } else if let Some(held) = prev.take() {
                    recipe.push(self.encode_temp_chunk(held, version, &mut last, store_tx)?);
                }
                debug!(%id, "matched existing chunk");
                recipe.push(Chunk::Stored { id });

                // Start over on a fresh window.
                buff.clear();
                while buff.len() < chunk_size {
                    match read_byte(&mut reader)? {
                        Some(b) => {
                            hasher.roll(b);
                            buff.push(b);
                        }
                        None => {
                            eof = true;
                            break;
                        }
                    }
                }
                continue;
            }

            if buff.len() == chunk_size * 2 {
                // The oldest chunk_size bytes can no longer begin a match;
                // hold them back for merging and slide the buffer.
                if let Some(held) = prev.take() {
                    recipe.push(self.encode_temp_chunk(held, version, &mut last, store_tx)?);
                }
                prev = Some(buff[..chunk_size].to_vec());
                buff.copy_within(chunk_size.., 0);
                buff.truncate(chunk_size);
            }
            match read_byte(&mut reader)? {
                Some(b) => {
                    hasher.roll(b);
                    buff.push(b);
                }
                None => eof = true,
            }
        }

        if !buff.is_empty() {
            let (held, temp) = if buff.len() > chunk_size {
                if let Some(held) = prev.take() {
                    recipe.push(self.encode_temp_chunk(held, version, &mut last, store_tx)?);
                }
                let tail = buff[chunk_size..].to_vec();
                buff.truncate(chunk_size);
                (Some(buff), tail)
            } else {
                (prev.take(), buff)
            };
            let encoded = self.encode_temp_chunks(held, temp, version, &mut last, store_tx)?;
            recipe.extend(encoded);
        }

        Ok((recipe, last))
    }

    /// Encode one unmatched region: as a delta if a resembling stored chunk
    /// yields a small enough patch, as a new stored chunk if it is exactly
    /// one chunk long, inline otherwise.
    fn encode_temp_chunk(
        &mut self,
        temp: Vec<u8>,
        version: u32,
        last: &mut u64,
        store_tx: &Sender<ChunkData>,
    ) -> Result<Chunk> {
        if let Some(delta) = self.try_delta_encode(&temp) {
            return Ok(delta);
        }
        if temp.len() == self.params.chunk_size {
            let id = ChunkId { version, index: *last };
            *last += 1;
            let (fingerprint, sketch) = self.hash_chunk(&temp);
            // Index before enqueueing so later lookups in this commit see
            // the chunk immediately.
            self.fingerprints.insert(fingerprint, id);
            self.sketches.insert(&sketch, id);
            let content: Arc<[u8]> = temp.into();
            self.cache.insert(id, Arc::clone(&content));
            store_tx
                .send(ChunkData {
                    hashes: HashRecord { fingerprint, sketch },
                    content,
                    id,
                })
                .map_err(|_| StrataError::WorkerTerminated)?;
            debug!(%id, "added new chunk");
            return Ok(Chunk::Stored { id });
        }
        debug!(len = temp.len(), "keeping partial chunk inline");
        Ok(Chunk::Temp(temp))
    }

    /// Encode an unmatched region together with the held-back chunk before
    /// it. A region too short to sketch is first merged with the held-back
    /// chunk and delta-encoded as a whole; if that fails both stay inline.
    fn encode_temp_chunks(
        &mut self,
        prev: Option<Vec<u8>>,
        curr: Vec<u8>,
        version: u32,
        last: &mut u64,
        store_tx: &Sender<ChunkData>,
    ) -> Result<Vec<Chunk>> {
        let Some(prev) = prev else {
            return Ok(vec![self.encode_temp_chunk(curr, version, last, store_tx)?]);
        };
        if curr.len() < self.sketchable_min() {
            let mut merged = Vec::with_capacity(prev.len() + curr.len());
            merged.extend_from_slice(&prev);
            merged.extend_from_slice(&curr);
            if let Some(delta) = self.try_delta_encode(&merged) {
                return Ok(vec![delta]);
            }
            Ok(vec![Chunk::Temp(prev), Chunk::Temp(curr)])
        } else {
            Ok(vec![
                self.encode_temp_chunk(prev, version, last, store_tx)?,
                self.encode_temp_chunk(curr, version, last, store_tx)?,
            ])
        }
    }

    /// Try to express `temp` as a patch against a resembling stored chunk.
    /// Failures to load or diff a candidate are not fatal; the region is
    /// simply stored as new content.
    fn try_delta_encode(&mut self, temp: &[u8]) -> Option<Chunk> {
        let source = self.find_similar_chunk(temp)?;
        let source_data = match self.load_chunk(source) {
            Ok(data) => data,
            Err(e) => {
                warn!(%source, "failed to load delta source: {e}");
                return None;
            }
        };
        let patch = match self.delta.diff(&source_data, temp) {
            Ok(patch) => patch,
            Err(e) => {
                warn!(%source, "delta encoding failed: {e}");
                return None;
            }
        };
        if patch.len() >= self.params.max_patch_size() {
            debug!(%source, patch = patch.len(), "patch too large, storing chunk instead");
            return None;
        }
        debug!(%source, patch = patch.len(), size = temp.len(), "added delta chunk");
        Some(Chunk::Delta {
            source,
            patch,
            size: temp.len() as u32,
        })
    }

    /// Vote over the sketch index: the candidate sharing the most
    /// super-features with `temp` wins, the most recently observed winning
    /// ties.
    fn find_similar_chunk(&self, temp: &[u8]) -> Option<ChunkId> {
        let sketch = sketch::sketch_chunk(
            temp,
            self.pol,
            self.params.chunk_size,
            self.params.sketch_w_size,
            self.params.sketch_sf_count,
            self.params.sketch_f_count,
        );
        let mut votes: HashMap<ChunkId, usize> = HashMap::new();
        let mut best: Option<ChunkId> = None;
        let mut max = 0usize;
        for sf in sketch {
            for &id in self.sketches.candidates(sf) {
                let count = votes.entry(id).or_insert(0);
                *count += 1;
                debug!(%id, votes = *count, "similar chunk candidate");
                if *count >= max {
                    max = *count;
                    best = Some(id);
                }
            }
        }
        best
    }
}

fn read_byte<R: Read>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Fill `buff` with up to `target` bytes; a clean end of stream leaves it
/// short, any other read error is fatal.
fn read_full<R: Read>(reader: &mut R, buff: &mut Vec<u8>, target: usize) -> Result<()> {
    buff.resize(target, 0);
    let mut filled = 0;
    while filled < target {
        match reader.read(&mut buff[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buff.truncate(filled);
    Ok(())
}
