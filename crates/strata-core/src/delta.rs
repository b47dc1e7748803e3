//! Binary delta codec.
//!
//! The engine only needs an opaque pair of inverse operations: `diff`
//! produces a patch turning `source` into `target`, `patch` applies it. The
//! reference implementation is bsdiff with the raw patch wrapped in a zlib
//! stream, so that patch sizes (which gate delta acceptance) reflect the
//! compressed form, as in classic bsdiff tooling.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Result, StrataError};

pub trait DeltaCodec: Send + Sync {
    fn diff(&self, source: &[u8], target: &[u8]) -> Result<Vec<u8>>;
    fn patch(&self, source: &[u8], patch: &[u8]) -> Result<Vec<u8>>;
}

pub struct Bsdiff;

impl DeltaCodec for Bsdiff {
    fn diff(&self, source: &[u8], target: &[u8]) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        bsdiff::diff(source, target, &mut raw)?;
        let mut encoder =
            ZlibEncoder::new(Vec::with_capacity(raw.len() / 4 + 16), Compression::default());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    fn patch(&self, source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        ZlibDecoder::new(patch).read_to_end(&mut raw).map_err(|e| {
            StrataError::InvalidFormat(format!("corrupt delta patch envelope: {e}"))
        })?;
        let mut target = Vec::new();
        bsdiff::patch(source, &mut raw.as_slice(), &mut target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::gen_text;

    #[test]
    fn patch_inverts_diff() {
        let codec = Bsdiff;
        let source = gen_text(3, 8192);
        let mut target = source.clone();
        target.splice(590..590, b"hello".iter().copied());

        let patch = codec.diff(&source, &target).unwrap();
        let rebuilt = codec.patch(&source, &patch).unwrap();
        assert_eq!(rebuilt, target);
    }

    #[test]
    fn similar_buffers_produce_small_patches() {
        let codec = Bsdiff;
        let source = gen_text(5, 8192);
        let mut target = source.clone();
        target.splice(4000..4000, std::iter::repeat(0u8).take(100));

        let patch = codec.diff(&source, &target).unwrap();
        assert!(
            patch.len() < 8192 / 10,
            "patch unexpectedly large: {} bytes",
            patch.len()
        );
    }

    #[test]
    fn unrelated_buffers_produce_large_patches() {
        let codec = Bsdiff;
        let source = gen_text(6, 8192);
        let target = gen_text(7, 8192);
        let patch = codec.diff(&source, &target).unwrap();
        assert!(patch.len() >= 8192 / 10);
    }

    #[test]
    fn empty_source_diffs_to_plain_insert() {
        let codec = Bsdiff;
        let target = gen_text(8, 1000);
        let patch = codec.diff(&[], &target).unwrap();
        assert_eq!(codec.patch(&[], &patch).unwrap(), target);
    }

    #[test]
    fn corrupt_patch_envelope_is_rejected() {
        let codec = Bsdiff;
        let err = codec.patch(b"source", b"definitely not zlib").unwrap_err();
        assert!(matches!(err, StrataError::InvalidFormat(_)));
    }
}
