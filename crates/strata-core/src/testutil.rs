//! Shared helpers for unit tests.

use std::fs;
use std::path::Path;

/// Deterministic log-like text: lines of seeded hex words. High-entropy
/// enough that unrelated chunks never delta-encode within the acceptance
/// bound, yet reproducible across runs.
pub fn gen_text(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0x5851_F42D_4C95_7F2D;
    let mut out = Vec::with_capacity(len + 32);
    let mut column = 0usize;
    while out.len() < len {
        let word = next(&mut state);
        let width = 4 + (word % 13) as usize;
        for i in 0..width {
            let nibble = (word >> (4 * (i % 16))) & 0xF;
            out.push(b"0123456789abcdef"[nibble as usize]);
        }
        column += width + 1;
        if column > 72 {
            out.push(b'\n');
            column = 0;
        } else {
            out.push(b' ');
        }
    }
    out.truncate(len);
    out
}

fn next(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Materialize `(relative_path, content)` pairs under `root`.
pub fn build_tree(root: &Path, entries: &[(&str, Vec<u8>)]) {
    for (rel, content) in entries {
        let path = rel.split('/').fold(root.to_path_buf(), |p, c| p.join(c));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}
