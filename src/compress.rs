//! Compression registry.
//!
//! The format names exactly four codecs.  The name written into the header
//! is authoritative; a reader that encounters any other name must fail
//! with `UnknownCompression` before touching the store.
//!
//! | Name      | Scheme                                   |
//! |-----------|------------------------------------------|
//! | `""`      | identity (bytes stored verbatim)         |
//! | `"zlib"`  | zlib, level 9                            |
//! | `"bz2"`   | bzip2, level 9                           |
//! | `"lzma2"` | raw (headerless) LZMA2 filter chain      |
//!
//! The raw LZMA2 stream carries no container framing, so encoder and
//! decoder must agree on the filter configuration; both sides here use the
//! same preset.

use std::io::Write;

use crate::error::{Result, SlobError};

/// Compression used for new files when the writer is not told otherwise.
pub const DEFAULT_COMPRESSION: Compression = Compression::Lzma2;

/// liblzma preset used for the raw LZMA2 filter on both sides.
const LZMA2_PRESET: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    Identity,
    Zlib,
    Bz2,
    Lzma2,
}

impl Compression {
    /// Resolve a registry name.  Returns `None` for unknown names; callers
    /// map that to [`SlobError::UnknownCompression`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" => Some(Compression::Identity),
            "zlib" => Some(Compression::Zlib),
            "bz2" => Some(Compression::Bz2),
            "lzma2" => Some(Compression::Lzma2),
            _ => None,
        }
    }

    /// The name written into the file header.
    pub fn name(self) -> &'static str {
        match self {
            Compression::Identity => "",
            Compression::Zlib => "zlib",
            Compression::Bz2 => "bz2",
            Compression::Lzma2 => "lzma2",
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Identity => Ok(data.to_vec()),
            Compression::Zlib => {
                let mut enc =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(9));
                enc.write_all(data)?;
                Ok(enc.finish()?)
            }
            Compression::Bz2 => {
                let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(9));
                enc.write_all(data)?;
                Ok(enc.finish()?)
            }
            Compression::Lzma2 => {
                let stream = xz2::stream::Stream::new_raw_encoder(&lzma2_filters()?)
                    .map_err(|e| SlobError::Compression(e.to_string()))?;
                let mut enc = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
                enc.write_all(data)?;
                Ok(enc.finish()?)
            }
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Identity => Ok(data.to_vec()),
            Compression::Zlib => {
                let mut dec = flate2::write::ZlibDecoder::new(Vec::new());
                dec.write_all(data)?;
                Ok(dec.finish()?)
            }
            Compression::Bz2 => {
                let mut dec = bzip2::write::BzDecoder::new(Vec::new());
                dec.write_all(data)?;
                Ok(dec.finish()?)
            }
            Compression::Lzma2 => {
                let stream = xz2::stream::Stream::new_raw_decoder(&lzma2_filters()?)
                    .map_err(|e| SlobError::Compression(e.to_string()))?;
                let mut dec = xz2::write::XzDecoder::new_stream(Vec::new(), stream);
                dec.write_all(data)?;
                Ok(dec.finish()?)
            }
        }
    }
}

fn lzma2_filters() -> Result<xz2::stream::Filters> {
    let opts = xz2::stream::LzmaOptions::new_preset(LZMA2_PRESET)
        .map_err(|e| SlobError::Compression(e.to_string()))?;
    let mut filters = xz2::stream::Filters::new();
    filters.lzma2(&opts);
    Ok(filters)
}
