//! In-memory fingerprint and sketch indices, and the on-disk hash records
//! they are rebuilt from.
//!
//! Both indices are owned by the matcher thread for the duration of a
//! commit. The hashes file of a version holds one fixed-width record per
//! stored chunk, in identifier order, so identifiers are reconstructed
//! positionally on reload.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::chunk::ChunkId;
use crate::error::{Result, StrataError};

/// Maps the rolling-hash fingerprint of a full chunk to the canonical
/// stored chunk with that content. First observed wins.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FingerprintIndex {
    entries: HashMap<u64, ChunkId>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: u64) -> Option<ChunkId> {
        self.entries.get(&fingerprint).copied()
    }

    pub fn insert(&mut self, fingerprint: u64, id: ChunkId) {
        self.entries.entry(fingerprint).or_insert(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps each super-feature to the chunks sharing it. Insertion is
/// idempotent per `(super_feature, id)` pair; candidate lists keep
/// first-observed order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SketchIndex {
    entries: HashMap<u64, Vec<ChunkId>>,
}

impl SketchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidates(&self, super_feature: u64) -> &[ChunkId] {
        self.entries
            .get(&super_feature)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn insert(&mut self, sketch: &[u64], id: ChunkId) {
        for &sf in sketch {
            let ids = self.entries.entry(sf).or_default();
            if !ids.contains(&id) {
                ids.push(id);
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

/// Hashes of one stored chunk, as recorded in the version's hashes file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub fingerprint: u64,
    pub sketch: Vec<u64>,
}

/// Append one fixed-width record: fingerprint then `sf_count` sketch words,
/// all little-endian.
pub fn write_record<W: Write>(w: &mut W, record: &HashRecord) -> Result<()> {
    w.write_all(&record.fingerprint.to_le_bytes())?;
    for sf in &record.sketch {
        w.write_all(&sf.to_le_bytes())?;
    }
    Ok(())
}

/// Decode a version's hashes file. The record width is fixed by
/// `sf_count`; a file whose length is not a whole number of records means
/// the repository was written with different sketch parameters.
pub fn read_hashes_file(path: &Path, sf_count: usize) -> Result<Vec<HashRecord>> {
    let data = fs::read(path)?;
    let width = 8 * (1 + sf_count);
    if data.len() % width != 0 {
        return Err(StrataError::ParameterMismatch(format!(
            "hashes file '{}' ({} bytes) is not a whole number of {width}-byte records \
             ({sf_count} super-features per sketch)",
            path.display(),
            data.len(),
        )));
    }
    let records = data
        .chunks_exact(width)
        .map(|rec| {
            let fingerprint = u64::from_le_bytes(rec[..8].try_into().expect("record width"));
            let sketch = rec[8..]
                .chunks_exact(8)
                .map(|sf| u64::from_le_bytes(sf.try_into().expect("record width")))
                .collect();
            HashRecord { fingerprint, sketch }
        })
        .collect();
    Ok(records)
}
