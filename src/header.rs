//! File prelude codec and the in-place tag editor.
//!
//! # Layout
//!
//! ```text
//! magic             8 bytes  = "!-1SLOB\x1F"
//! uuid             16 bytes  random v4, assigned at finalize
//! encoding          tiny text, always UTF-8 encoded
//! compression       tiny text, header encoding
//! tag count         u8
//!   tag key         tiny text
//!   tag value       tiny text, padded to 255 bytes (editable in place)
//! content type count u8
//!   content type    text
//! blob_count        u32
//! store_offset      u64
//! file_size         u64
//! ```
//!
//! The reference index begins immediately after the prelude; its offset is
//! captured as `refs_offset` during the parse.  The padded tag values are
//! the only bytes the format permits rewriting after finalization.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use uuid::Uuid;

use crate::codec::{StructReader, StructWriter, TextEncoding};
use crate::compress::Compression;
use crate::error::{Result, SlobError};

pub const MAGIC: &[u8; 8] = b"!-1SLOB\x1f";

#[derive(Debug, Clone)]
pub struct Header {
    pub uuid: Uuid,
    /// The encoding name exactly as stored in the file.
    pub encoding_name: String,
    pub encoding: TextEncoding,
    pub compression: Compression,
    pub tags: Vec<(String, String)>,
    pub content_types: Vec<String>,
    pub blob_count: u32,
    pub store_offset: u64,
    /// Total file size declared by the writer; verified against the actual
    /// size at open.
    pub size: u64,
    /// Absolute offset of the reference index, recorded after the parse.
    pub refs_offset: u64,
}

pub fn read_header<R: Read + Seek>(reader: &mut R) -> Result<Header> {
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; MAGIC.len()];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(SlobError::UnknownFileFormat);
    }

    let mut uuid_bytes = [0u8; 16];
    reader.read_exact(&mut uuid_bytes)?;
    let uuid = Uuid::from_bytes(uuid_bytes);

    // The encoding name itself is always UTF-8; everything after it is
    // decoded with the declared encoding.
    let mut r = StructReader::new(reader, TextEncoding::utf8());
    let encoding_name = r.read_tiny_text()?;
    let encoding = TextEncoding::for_label(&encoding_name)
        .ok_or_else(|| SlobError::UnknownEncoding(encoding_name.clone()))?;
    r.set_encoding(encoding);

    let compression_name = r.read_tiny_text()?;
    let compression = Compression::from_name(&compression_name)
        .ok_or(SlobError::UnknownCompression(compression_name))?;

    let tag_count = r.read_u8()?;
    let mut tags = Vec::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let key = r.read_tiny_text()?;
        let value = r.read_tiny_text()?;
        tags.push((key, value));
    }

    let content_type_count = r.read_u8()?;
    let mut content_types = Vec::with_capacity(content_type_count as usize);
    for _ in 0..content_type_count {
        content_types.push(r.read_text()?);
    }

    let blob_count = r.read_u32()?;
    let store_offset = r.read_u64()?;
    let size = r.read_u64()?;
    let refs_offset = r.position()?;

    Ok(Header {
        uuid,
        encoding_name,
        encoding,
        compression,
        tags,
        content_types,
        blob_count,
        store_offset,
        size,
        refs_offset,
    })
}

/// Overwrite the value of tag `name` in place.
///
/// Tag values are padded to 255 bytes precisely so this edit never moves a
/// byte of the surrounding file; the total file size is unchanged.  Fails
/// with [`SlobError::TagNotFound`] when no tag matches and
/// [`SlobError::UnknownEncoding`] when the header is unreadable.
pub fn set_tag_value<P: AsRef<Path>>(filename: P, name: &str, value: &str) -> Result<()> {
    let file = OpenOptions::new().read(true).write(true).open(filename)?;

    let mut r = StructReader::new(file, TextEncoding::utf8());
    r.seek((MAGIC.len() + 16) as u64)?;
    let encoding_name = r.read_tiny_text()?;
    let encoding = TextEncoding::for_label(&encoding_name)
        .ok_or(SlobError::UnknownEncoding(encoding_name))?;
    r.set_encoding(encoding);

    r.read_tiny_text()?; // compression
    let tag_count = r.read_u8()?;
    for _ in 0..tag_count {
        let key = r.read_tiny_text()?;
        if key == name {
            // The cursor now sits on the padded value field.
            let mut w = StructWriter::new(r.into_inner(), encoding);
            w.write_tiny_text_editable(value)?;
            return Ok(());
        }
        r.read_tiny_text()?; // skip the value
    }
    Err(SlobError::TagNotFound(name.to_string()))
}
