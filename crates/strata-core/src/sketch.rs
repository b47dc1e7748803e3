//! Resemblance sketches.
//!
//! A chunk's sketch is a short vector of super-features: the chunk is cut
//! into consecutive feature regions, each region contributes the maximum
//! rolling-hash value over all of its fixed-size windows, and each group of
//! `f_count` feature values is packed little-endian and hashed into one
//! super-feature. Two chunks sharing even one super-feature are very likely
//! to share long byte runs, which makes one a good patch base for the other.

use crate::rolling::{Pol, RollingHash};

/// Bytes in one feature region.
pub fn feature_size(chunk_size: usize, sf_count: usize, f_count: usize) -> usize {
    chunk_size / (sf_count * f_count)
}

/// Minimum chunk length for a sketch worth indexing; chunks below it are
/// merged with their predecessor before delta encoding is attempted.
pub fn super_feature_size(chunk_size: usize, sf_count: usize, f_count: usize) -> usize {
    feature_size(chunk_size, sf_count, f_count) * sf_count
}

/// Compute the sketch of `data`. Chunks shorter than one feature region
/// yield an empty sketch and are not indexable by resemblance.
pub fn sketch_chunk(
    data: &[u8],
    pol: Pol,
    chunk_size: usize,
    w_size: usize,
    sf_count: usize,
    f_count: usize,
) -> Vec<u64> {
    let f_size = feature_size(chunk_size, sf_count, f_count);
    let mut hasher = RollingHash::new(pol);

    let mut features = Vec::with_capacity(sf_count * f_count);
    for region in data.chunks_exact(f_size) {
        features.push(calc_feature(&mut hasher, region, w_size));
    }

    let mut super_features = Vec::with_capacity(sf_count);
    let mut packed = vec![0u8; 8 * f_count];
    for group in features.chunks_exact(f_count) {
        for (slot, feature) in packed.chunks_exact_mut(8).zip(group) {
            slot.copy_from_slice(&feature.to_le_bytes());
        }
        hasher.reset();
        hasher.write(&packed);
        super_features.push(hasher.sum());
    }
    super_features
}

/// Maximum rolling-hash value over all `w_size` windows of one region.
fn calc_feature(hasher: &mut RollingHash, region: &[u8], w_size: usize) -> u64 {
    hasher.reset();
    hasher.write(&region[..w_size]);
    let mut max = hasher.sum();
    for &b in &region[w_size..] {
        hasher.roll(b);
        max = max.max(hasher.sum());
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::gen_text;

    const CHUNK_SIZE: usize = 8192;
    const W_SIZE: usize = 32;
    const SF_COUNT: usize = 3;
    const F_COUNT: usize = 4;

    fn sketch(data: &[u8]) -> Vec<u64> {
        sketch_chunk(data, Pol::derive(1), CHUNK_SIZE, W_SIZE, SF_COUNT, F_COUNT)
    }

    #[test]
    fn derived_sizes() {
        assert_eq!(feature_size(8192, 3, 4), 682);
        assert_eq!(super_feature_size(8192, 3, 4), 2046);
    }

    #[test]
    fn full_chunk_yields_sf_count_super_features() {
        let data = gen_text(7, CHUNK_SIZE);
        let sk = sketch(&data);
        assert_eq!(sk.len(), SF_COUNT);
    }

    #[test]
    fn sketch_is_deterministic() {
        let data = gen_text(7, CHUNK_SIZE);
        assert_eq!(sketch(&data), sketch(&data));
    }

    #[test]
    fn partial_chunk_yields_fewer_super_features() {
        // 4096 bytes cover six 682-byte regions: one full feature group.
        let data = gen_text(9, 4096);
        assert_eq!(sketch(&data).len(), 1);
    }

    #[test]
    fn short_chunk_yields_empty_sketch() {
        let data = gen_text(9, 500);
        assert!(sketch(&data).is_empty());
    }

    #[test]
    fn identical_prefix_regions_share_super_features() {
        // Two chunks agreeing on the span of the first feature group share
        // its super-feature even if the rest differs.
        let mut a = gen_text(11, CHUNK_SIZE);
        let b = a.clone();
        let group_span = feature_size(CHUNK_SIZE, SF_COUNT, F_COUNT) * F_COUNT;
        for byte in &mut a[group_span..] {
            *byte = byte.wrapping_add(1);
        }
        let sa = sketch(&a);
        let sb = sketch(&b);
        assert_eq!(sa[0], sb[0]);
        assert_ne!(sa, sb);
    }

    #[test]
    fn different_content_differs() {
        assert_ne!(sketch(&gen_text(1, CHUNK_SIZE)), sketch(&gen_text(2, CHUNK_SIZE)));
    }
}
