//! Recipe serialization.
//!
//! A recipe is the ordered sequence of chunks whose concatenated logical
//! contents rebuild a version's byte stream. On disk it is a
//! self-delimiting sequence of tagged entries, read until end of file:
//!
//! ```text
//! 0x00  Stored  version:u32  index:u64
//! 0x01  Temp    len:u32      bytes
//! 0x02  Delta   version:u32  index:u64  size:u32  patch_len:u32  patch
//! ```
//!
//! All integers little-endian, so compliant writers produce byte-identical
//! recipes for the same input.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::chunk::{Chunk, ChunkId};
use crate::error::{Result, StrataError};
use crate::framing::{read_exact_frame, read_exact_or_eof, read_u32_le, read_u64_le};

const TAG_STORED: u8 = 0x00;
const TAG_TEMP: u8 = 0x01;
const TAG_DELTA: u8 = 0x02;

pub fn store_recipe(path: &Path, recipe: &[Chunk]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for chunk in recipe {
        write_entry(&mut w, chunk)?;
    }
    w.flush()?;
    Ok(())
}

pub fn load_recipe(path: &Path) -> Result<Vec<Chunk>> {
    let mut r = BufReader::new(File::open(path)?);
    let mut recipe = Vec::new();
    while let Some(chunk) = read_entry(&mut r)? {
        recipe.push(chunk);
    }
    Ok(recipe)
}

fn write_entry<W: Write>(w: &mut W, chunk: &Chunk) -> Result<()> {
    match chunk {
        Chunk::Stored { id } => {
            w.write_all(&[TAG_STORED])?;
            write_id(w, id)?;
        }
        Chunk::Temp(data) => {
            w.write_all(&[TAG_TEMP])?;
            w.write_all(&(data.len() as u32).to_le_bytes())?;
            w.write_all(data)?;
        }
        Chunk::Delta { source, patch, size } => {
            w.write_all(&[TAG_DELTA])?;
            write_id(w, source)?;
            w.write_all(&size.to_le_bytes())?;
            w.write_all(&(patch.len() as u32).to_le_bytes())?;
            w.write_all(patch)?;
        }
    }
    Ok(())
}

fn read_entry<R: Read>(r: &mut R) -> Result<Option<Chunk>> {
    let mut tag = [0u8; 1];
    if !read_exact_or_eof(r, &mut tag, "recipe entry")? {
        return Ok(None);
    }
    let chunk = match tag[0] {
        TAG_STORED => Chunk::Stored { id: read_id(r)? },
        TAG_TEMP => {
            let len = read_u32_le(r, "temp chunk length")? as usize;
            let mut data = vec![0u8; len];
            read_exact_frame(r, &mut data, "temp chunk bytes")?;
            Chunk::Temp(data)
        }
        TAG_DELTA => {
            let source = read_id(r)?;
            let size = read_u32_le(r, "delta chunk size")?;
            let patch_len = read_u32_le(r, "delta patch length")? as usize;
            let mut patch = vec![0u8; patch_len];
            read_exact_frame(r, &mut patch, "delta patch bytes")?;
            Chunk::Delta { source, patch, size }
        }
        t => return Err(StrataError::UnknownChunkTag(t)),
    };
    Ok(Some(chunk))
}

fn write_id<W: Write>(w: &mut W, id: &ChunkId) -> Result<()> {
    w.write_all(&id.version.to_le_bytes())?;
    w.write_all(&id.index.to_le_bytes())?;
    Ok(())
}

fn read_id<R: Read>(r: &mut R) -> Result<ChunkId> {
    let version = read_u32_le(r, "chunk id version")?;
    let index = read_u64_le(r, "chunk id index")?;
    Ok(ChunkId { version, index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_recipe() -> Vec<Chunk> {
        vec![
            Chunk::Stored {
                id: ChunkId { version: 0, index: 0 },
            },
            Chunk::Delta {
                source: ChunkId { version: 0, index: 1 },
                patch: vec![9, 8, 7],
                size: 8192,
            },
            Chunk::Temp(b"tail bytes".to_vec()),
        ]
    }

    #[test]
    fn recipe_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe");
        let recipe = sample_recipe();
        store_recipe(&path, &recipe).unwrap();
        assert_eq!(load_recipe(&path).unwrap(), recipe);
    }

    #[test]
    fn serialization_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        store_recipe(&a, &sample_recipe()).unwrap();
        store_recipe(&b, &sample_recipe()).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn empty_recipe_is_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe");
        store_recipe(&path, &[]).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), 0);
        assert!(load_recipe(&path).unwrap().is_empty());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe");
        fs::write(&path, [0x7F]).unwrap();
        let err = load_recipe(&path).unwrap_err();
        assert!(matches!(err, StrataError::UnknownChunkTag(0x7F)));
    }

    #[test]
    fn truncated_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe");
        store_recipe(&path, &sample_recipe()).unwrap();
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 4]).unwrap();
        let err = load_recipe(&path).unwrap_err();
        assert!(matches!(err, StrataError::InvalidFormat(_)));
    }
}
