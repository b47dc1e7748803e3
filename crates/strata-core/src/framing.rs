//! Little-endian framing primitives shared by the repository files.
//!
//! Every repository file (file list, hashes, recipe) is a self-delimiting
//! sequence of explicitly framed records, so that two compliant writers
//! produce byte-identical files for the same input.

use std::io::{self, Read};

use crate::error::{Result, StrataError};

/// Read exactly `buf.len()` bytes. Returns `false` on a clean end of stream
/// before the first byte; a partial read is a format error.
pub(crate) fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(StrataError::InvalidFormat(format!("truncated {what}")));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Read exactly `buf.len()` bytes; end of stream anywhere is a format error.
pub(crate) fn read_exact_frame<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    if read_exact_or_eof(r, buf, what)? {
        Ok(())
    } else {
        Err(StrataError::InvalidFormat(format!("truncated {what}")))
    }
}

pub(crate) fn read_u32_le<R: Read>(r: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_frame(r, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64_le<R: Read>(r: &mut R, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact_frame(r, &mut buf, what)?;
    Ok(u64::from_le_bytes(buf))
}
