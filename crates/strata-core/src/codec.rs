//! Payload compression wrapper for stored chunks.
//!
//! The codec is a repository parameter, not a per-blob property: every chunk
//! payload in a repository is written and read with the same wrapper, and a
//! mismatch between the configured codec and the on-disk data surfaces as a
//! format error on read.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Deserialize;

use crate::error::{Result, StrataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Identity,
    #[default]
    Zlib,
}

impl Codec {
    pub fn encode(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::Identity => Ok(data.to_vec()),
            Codec::Zlib => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2 + 16),
                    Compression::default(),
                );
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::Identity => Ok(data.to_vec()),
            Codec::Zlib => {
                let mut out = Vec::with_capacity(data.len() * 2);
                ZlibDecoder::new(data).read_to_end(&mut out).map_err(|e| {
                    StrataError::InvalidFormat(format!(
                        "zlib chunk payload (codec parameter mismatch?): {e}"
                    ))
                })?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_roundtrip() {
        let data = b"some chunk payload";
        let encoded = Codec::Identity.encode(data).unwrap();
        assert_eq!(encoded, data);
        assert_eq!(Codec::Identity.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn zlib_roundtrip_compresses_repetitive_data() {
        let data = vec![0x41u8; 4096];
        let encoded = Codec::Zlib.encode(&data).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(Codec::Zlib.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn zlib_rejects_garbage() {
        let err = Codec::Zlib.decode(b"not a zlib stream").unwrap_err();
        assert!(matches!(err, StrataError::InvalidFormat(_)));
    }

    #[test]
    fn codec_parses_from_config_names() {
        let codec: Codec = serde_yaml::from_str("zlib").unwrap();
        assert_eq!(codec, Codec::Zlib);
        let codec: Codec = serde_yaml::from_str("identity").unwrap();
        assert_eq!(codec, Codec::Identity);
    }
}
