//! The repository: versioned, deduplicated storage for one source tree.
//!
//! Layout on disk:
//!
//! ```text
//! <repo>/<VVVVV>/chunks/<IIIIIIIIIIIIIII>   chunk payloads (through codec)
//! <repo>/<VVVVV>/files                       framed file list
//! <repo>/<VVVVV>/hashes                      fingerprint + sketch per chunk
//! <repo>/<VVVVV>/recipe                      framed stream of tagged chunks
//! ```
//!
//! Version directories are 5-digit zero-padded and dense from zero.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use crate::chunk::{version_dir_name, Chunk, ChunkId};
use crate::config::RepoParams;
use crate::delta::{Bsdiff, DeltaCodec};
use crate::error::{Result, StrataError};
use crate::files;
use crate::index::{FingerprintIndex, SketchIndex};
use crate::matcher::{self, STORE_QUEUE_DEPTH};
use crate::pipe::{self, PipeWriter};
use crate::recipe;
use crate::rolling::{Pol, RollingHash};
use crate::sketch;
use crate::store::FifoCache;

pub const CHUNKS_DIR: &str = "chunks";
pub const FILES_NAME: &str = "files";
pub const HASHES_NAME: &str = "hashes";
pub const RECIPE_NAME: &str = "recipe";

/// Blocks buffered in the commit/restore stream pipes.
const PIPE_DEPTH: usize = 10;

pub struct Repository {
    pub(crate) path: PathBuf,
    pub(crate) params: RepoParams,
    pub(crate) pol: Pol,
    pub(crate) delta: Box<dyn DeltaCodec>,
    pub(crate) fingerprints: FingerprintIndex,
    pub(crate) sketches: SketchIndex,
    pub(crate) cache: FifoCache,
}

#[derive(Debug, Clone, Copy)]
pub struct CommitStats {
    pub version: u32,
    pub files: usize,
    pub source_bytes: u64,
    pub recipe_chunks: usize,
    pub new_chunks: u64,
    pub delta_chunks: usize,
    pub temp_chunks: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RestoreStats {
    pub version: u32,
    pub files: usize,
    pub bytes: u64,
}

impl Repository {
    /// Open (creating if needed) a repository rooted at `path`. Parameters
    /// must match the ones the repository was written with.
    pub fn open(path: impl Into<PathBuf>, params: RepoParams) -> Result<Self> {
        params.validate()?;
        let path = path.into();
        fs::create_dir_all(&path)?;
        let pol = Pol::derive(params.polynomial_seed);
        debug!("derived rolling-hash polynomial {:#x}", pol.0);
        Ok(Self {
            path,
            cache: FifoCache::new(params.cache_capacity),
            params,
            pol,
            delta: Box::new(Bsdiff),
            fingerprints: FingerprintIndex::new(),
            sketches: SketchIndex::new(),
        })
    }

    pub fn params(&self) -> &RepoParams {
        &self.params
    }

    pub fn fingerprints(&self) -> &FingerprintIndex {
        &self.fingerprints
    }

    pub fn sketches(&self) -> &SketchIndex {
        &self.sketches
    }

    /// Committed version numbers, ascending. Version directories must be
    /// numeric and dense from zero.
    pub fn load_versions(&self) -> Result<Vec<u32>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let version: u32 = name.parse().map_err(|_| {
                StrataError::InvalidFormat(format!("unexpected directory '{name}' in repository"))
            })?;
            versions.push(version);
        }
        versions.sort_unstable();
        for (expected, &version) in versions.iter().enumerate() {
            if version != expected as u32 {
                return Err(StrataError::InvalidFormat(format!(
                    "version directories are not dense: missing {}",
                    version_dir_name(expected as u32)
                )));
            }
        }
        Ok(versions)
    }

    pub(crate) fn version_dir(&self, version: u32) -> PathBuf {
        self.path.join(version_dir_name(version))
    }

    /// Rebuild both indices from the hashes files of the given versions.
    /// The Nth record of a version's hashes file belongs to chunk
    /// `(version, N)`.
    pub fn load_hashes(&mut self, versions: &[u32]) -> Result<()> {
        for &version in versions {
            let path = self.version_dir(version).join(HASHES_NAME);
            let records = crate::index::read_hashes_file(&path, self.params.sketch_sf_count)?;
            let count = records.len();
            for (ordinal, record) in records.into_iter().enumerate() {
                let id = ChunkId { version, index: ordinal as u64 };
                self.fingerprints.insert(record.fingerprint, id);
                self.sketches.insert(&record.sketch, id);
            }
            debug!(version, records = count, "loaded hash records");
        }
        Ok(())
    }

    /// Decoded payload of a stored chunk, through the FIFO cache.
    pub fn load_chunk(&mut self, id: ChunkId) -> Result<Arc<[u8]>> {
        if let Some(data) = self.cache.get(&id) {
            return Ok(data);
        }
        let path = id.payload_path(&self.path);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StrataError::ChunkMissing(id));
            }
            Err(e) => return Err(e.into()),
        };
        let data: Arc<[u8]> = self.params.codec.decode(&raw)?.into();
        self.cache.insert(id, Arc::clone(&data));
        Ok(data)
    }

    /// Fingerprint and sketch of one chunk. The two hashes share nothing
    /// but the input, so they are computed in parallel; all index updates
    /// stay with the caller.
    pub(crate) fn hash_chunk(&self, data: &[u8]) -> (u64, Vec<u64>) {
        rayon::join(
            || {
                let mut hasher = RollingHash::new(self.pol);
                hasher.write(data);
                hasher.sum()
            },
            || {
                sketch::sketch_chunk(
                    data,
                    self.pol,
                    self.params.chunk_size,
                    self.params.sketch_w_size,
                    self.params.sketch_sf_count,
                    self.params.sketch_f_count,
                )
            },
        )
    }

    /// Create a new version of `source` in the repository.
    pub fn commit(&mut self, source: &Path) -> Result<CommitStats> {
        let versions = self.load_versions()?;
        let version = versions.len() as u32;
        let version_dir = self.version_dir(version);
        fs::create_dir_all(version_dir.join(CHUNKS_DIR))?;

        let files = files::list_files(source)?;
        let source_bytes: u64 = files.iter().map(|f| f.size).sum();
        info!(version, files = files.len(), bytes = source_bytes, "starting commit");

        self.load_hashes(&versions)?;

        let (pipe_reader, pipe_writer) = pipe::pipe(PIPE_DEPTH, self.params.chunk_size);
        let (store_tx, store_rx) = crossbeam_channel::bounded(STORE_QUEUE_DEPTH);
        let codec = self.params.codec;
        let worker_dir = version_dir.clone();

        let (recipe, new_chunks) = thread::scope(|s| -> Result<(Vec<Chunk>, u64)> {
            s.spawn(|| files::concat_files(source, &files, pipe_writer));
            let worker = s.spawn(move || matcher::storage_worker(&worker_dir, codec, store_rx));

            let matched = self.match_stream(pipe_reader, version, &store_tx);
            // Close the queue so the worker drains and exits.
            drop(store_tx);
            let worker_result = worker
                .join()
                .map_err(|_| StrataError::WorkerTerminated)?;
            // A worker failure is the root cause when the matcher only saw
            // a closed queue.
            worker_result?;
            matched
        })?;

        files::store_file_list(&version_dir.join(FILES_NAME), &files)?;
        recipe::store_recipe(&version_dir.join(RECIPE_NAME), &recipe)?;

        let stats = CommitStats {
            version,
            files: files.len(),
            source_bytes,
            recipe_chunks: recipe.len(),
            new_chunks,
            delta_chunks: recipe
                .iter()
                .filter(|c| matches!(c, Chunk::Delta { .. }))
                .count(),
            temp_chunks: recipe
                .iter()
                .filter(|c| matches!(c, Chunk::Temp(_)))
                .count(),
        };
        info!(
            version,
            chunks = stats.recipe_chunks,
            new = stats.new_chunks,
            deltas = stats.delta_chunks,
            "commit complete"
        );
        Ok(stats)
    }

    /// Restore the latest version into `dest`.
    pub fn restore(&mut self, dest: &Path) -> Result<RestoreStats> {
        let versions = self.load_versions()?;
        let Some(&version) = versions.last() else {
            return Err(StrataError::InvalidFormat(
                "repository has no committed versions".into(),
            ));
        };
        let version_dir = self.version_dir(version);
        let files = files::load_file_list(&version_dir.join(FILES_NAME))?;
        let recipe = recipe::load_recipe(&version_dir.join(RECIPE_NAME))?;
        info!(version, files = files.len(), chunks = recipe.len(), "starting restore");

        let (mut pipe_reader, pipe_writer) = pipe::pipe(PIPE_DEPTH, self.params.chunk_size);
        thread::scope(|s| -> Result<()> {
            let consumer = s.spawn(|| files::write_files(dest, &files, &mut pipe_reader));
            let produced = self.restore_stream(&recipe, pipe_writer);
            let consumed = consumer
                .join()
                .map_err(|_| StrataError::WorkerTerminated)?;
            match produced {
                // The producer fails with a broken pipe only when the
                // consumer died first; its error is then the root cause.
                Err(StrataError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    consumed?;
                    Err(StrataError::Io(e))
                }
                Err(e) => Err(e),
                Ok(()) => consumed,
            }
        })?;

        let bytes: u64 = files.iter().map(|f| f.size).sum();
        info!(version, files = files.len(), bytes, "restore complete");
        Ok(RestoreStats { version, files: files.len(), bytes })
    }

    /// Stream the logical content of every recipe entry into the pipe.
    pub(crate) fn restore_stream(&mut self, recipe: &[Chunk], mut writer: PipeWriter) -> Result<()> {
        use std::io::Write;
        for chunk in recipe {
            match chunk {
                Chunk::Stored { id } => {
                    let data = self.load_chunk(*id)?;
                    writer.write_all(&data)?;
                }
                Chunk::Temp(data) => writer.write_all(data)?,
                Chunk::Delta { source, patch, size } => {
                    let source_data = self.load_chunk(*source)?;
                    let target = self.delta.patch(&source_data, patch)?;
                    if target.len() != *size as usize {
                        return Err(StrataError::InvalidFormat(format!(
                            "delta against {source} patched to {} bytes, recorded size {size}",
                            target.len()
                        )));
                    }
                    writer.write_all(&target)?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Chunks shorter than this cannot carry a useful sketch; the matcher
    /// merges them with the preceding held-back chunk before trying delta
    /// encoding.
    pub(crate) fn sketchable_min(&self) -> usize {
        sketch::super_feature_size(
            self.params.chunk_size,
            self.params.sketch_sf_count,
            self.params.sketch_f_count,
        )
    }
}
