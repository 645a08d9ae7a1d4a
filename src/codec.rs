//! Fixed-width integer and length-prefixed text primitives.
//!
//! # On-disk conventions (frozen)
//!
//! - Every multi-byte integer is big-endian.  There is no negotiation and
//!   no little-endian variant.
//! - `tiny_text` is a u8 byte length followed by encoded bytes; `text` is
//!   the same with a u16 length.
//! - A tiny text written with `editable = true` is padded with NULs to the
//!   full 255 bytes so the value can be rewritten in place after the file
//!   is finalized.  On read, a text whose declared length equals the
//!   maximum representable value is truncated at its first NUL, which
//!   restores the logical value of such a padded field.

use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, SlobError};

pub const MAX_TINY_TEXT_LEN: usize = u8::MAX as usize;
pub const MAX_TEXT_LEN: usize = u16::MAX as usize;
pub const MAX_LARGE_BYTE_STRING_LEN: usize = u32::MAX as usize;
pub const MAX_BIN_ITEM_COUNT: usize = u16::MAX as usize;

// ── Text encoding ────────────────────────────────────────────────────────────

/// A character encoding resolved from the label stored in a SLOB header.
///
/// Keys, fragments, tags, and content types are all decoded with the
/// header's declared encoding; the encoding and compression names
/// themselves are always UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding {
    inner: &'static encoding_rs::Encoding,
}

impl TextEncoding {
    /// Resolve an encoding label ("utf-8", "UTF-16LE", ...).  Returns
    /// `None` for labels the encoding registry does not know.
    pub fn for_label(label: &str) -> Option<Self> {
        encoding_rs::Encoding::for_label(label.as_bytes()).map(|inner| Self { inner })
    }

    pub fn utf8() -> Self {
        Self { inner: encoding_rs::UTF_8 }
    }

    /// Canonical name of the underlying encoding.
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// Whether an encoder exists that produces this encoding.  UTF-16
    /// variants are decode-only in the encoding registry; a writer must
    /// refuse them or it would emit bytes that contradict its own header.
    pub fn is_encodable(&self) -> bool {
        self.inner.output_encoding() == self.inner
    }

    /// Strict decode: malformed byte sequences are an error, not
    /// replacement characters.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let (text, had_errors) = self.inner.decode_without_bom_handling(bytes);
        if had_errors {
            return Err(SlobError::Malformed(format!(
                "undecodable {} byte sequence",
                self.name()
            )));
        }
        Ok(text.into_owned())
    }

    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        let (bytes, _, _) = self.inner.encode(text);
        bytes
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct StructReader<R> {
    inner: R,
    encoding: TextEncoding,
}

impl<R: Read + Seek> StructReader<R> {
    pub fn new(inner: R, encoding: TextEncoding) -> Self {
        Self { inner, encoding }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.encoding = encoding;
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        self.inner.read_u8()
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        self.inner.read_u16::<BigEndian>()
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        self.inner.read_u32::<BigEndian>()
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        self.inner.read_u64::<BigEndian>()
    }

    pub fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_text_with_max(&mut self, length: usize, max_length: usize) -> Result<String> {
        let mut bytes = self.read_bytes(length)?;
        if length == max_length {
            // Padded editable field: the logical value ends at the first NUL.
            if let Some(nul) = bytes.iter().position(|&b| b == 0) {
                bytes.truncate(nul);
            }
        }
        self.encoding.decode(&bytes)
    }

    pub fn read_tiny_text(&mut self) -> Result<String> {
        let length = self.read_u8()? as usize;
        self.read_text_with_max(length, MAX_TINY_TEXT_LEN)
    }

    pub fn read_text(&mut self) -> Result<String> {
        let length = self.read_u16()? as usize;
        self.read_text_with_max(length, MAX_TEXT_LEN)
    }

    pub fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.inner.seek(SeekFrom::Start(pos))
    }

    pub fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Write-side counterpart of [`StructReader`].  Tracks the number of bytes
/// written so append-only temp streams can report their position without a
/// seekable handle.
pub struct StructWriter<W> {
    inner: W,
    encoding: TextEncoding,
    position: u64,
}

impl<W: Write> StructWriter<W> {
    pub fn new(inner: W, encoding: TextEncoding) -> Self {
        Self { inner, encoding, position: 0 }
    }

    /// Bytes written through this writer since construction.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_u8(&mut self, value: u8) -> io::Result<()> {
        self.inner.write_u8(value)?;
        self.position += 1;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> io::Result<()> {
        self.inner.write_u16::<BigEndian>(value)?;
        self.position += 2;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.inner.write_u32::<BigEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> io::Result<()> {
        self.inner.write_u64::<BigEndian>(value)?;
        self.position += 8;
        Ok(())
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn write_text_bytes(&mut self, bytes: &[u8], tiny: bool, pad: bool) -> Result<()> {
        let max_length = if tiny { MAX_TINY_TEXT_LEN } else { MAX_TEXT_LEN };
        if bytes.len() > max_length {
            return Err(SlobError::Malformed(format!(
                "text of {} bytes exceeds the {} byte length field",
                bytes.len(),
                max_length
            )));
        }
        if tiny {
            let declared = if pad { MAX_TINY_TEXT_LEN } else { bytes.len() };
            self.write_u8(declared as u8)?;
        } else {
            self.write_u16(bytes.len() as u16)?;
        }
        self.write_all(bytes)?;
        if pad {
            for _ in bytes.len()..MAX_TINY_TEXT_LEN {
                self.write_u8(0)?;
            }
        }
        Ok(())
    }

    pub fn write_tiny_text(&mut self, text: &str) -> Result<()> {
        let bytes = self.encoding.encode(text).into_owned();
        self.write_text_bytes(&bytes, true, false)
    }

    /// Write a tiny text padded to the full 255 bytes so it can later be
    /// rewritten in place.
    pub fn write_tiny_text_editable(&mut self, text: &str) -> Result<()> {
        let bytes = self.encoding.encode(text).into_owned();
        self.write_text_bytes(&bytes, true, true)
    }

    /// Write a tiny text in an explicit encoding, ignoring the writer's
    /// own.  The header's encoding name field is always UTF-8.
    pub fn write_tiny_text_as(&mut self, text: &str, encoding: TextEncoding) -> Result<()> {
        let bytes = encoding.encode(text).into_owned();
        self.write_text_bytes(&bytes, true, false)
    }

    pub fn write_text(&mut self, text: &str) -> Result<()> {
        let bytes = self.encoding.encode(text).into_owned();
        self.write_text_bytes(&bytes, false, false)
    }

    /// Copy `reader` to this writer until EOF, keeping position tracking
    /// intact.  Returns bytes copied.
    pub fn copy_from<R: Read>(&mut self, reader: &mut R) -> io::Result<u64> {
        let mut buf = vec![0u8; 1024 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write_all(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: Vec<u8>) -> StructReader<Cursor<Vec<u8>>> {
        StructReader::new(Cursor::new(bytes), TextEncoding::utf8())
    }

    #[test]
    fn integers_are_big_endian() {
        let mut w = StructWriter::new(Vec::new(), TextEncoding::utf8());
        w.write_u16(0x0102).unwrap();
        w.write_u32(0x03040506).unwrap();
        w.write_u64(0x0708090a0b0c0d0e).unwrap();
        assert_eq!(w.position(), 14);
        let bytes = w.into_inner();
        assert_eq!(&bytes[..2], &[1, 2]);
        assert_eq!(&bytes[2..6], &[3, 4, 5, 6]);

        let mut r = reader(bytes);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert_eq!(r.read_u32().unwrap(), 0x03040506);
        assert_eq!(r.read_u64().unwrap(), 0x0708090a0b0c0d0e);
    }

    #[test]
    fn editable_tiny_text_pads_to_255() {
        let mut w = StructWriter::new(Vec::new(), TextEncoding::utf8());
        w.write_tiny_text_editable("short").unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 1 + 255);
        assert_eq!(bytes[0], 255);
        assert_eq!(&bytes[1..6], b"short");
        assert!(bytes[6..].iter().all(|&b| b == 0));

        let mut r = reader(bytes);
        assert_eq!(r.read_tiny_text().unwrap(), "short");
    }

    #[test]
    fn non_editable_text_is_exact_length() {
        let mut w = StructWriter::new(Vec::new(), TextEncoding::utf8());
        w.write_tiny_text("héllo").unwrap();
        w.write_text("wörld").unwrap();
        let bytes = w.into_inner();

        let mut r = reader(bytes);
        assert_eq!(r.read_tiny_text().unwrap(), "héllo");
        assert_eq!(r.read_text().unwrap(), "wörld");
    }

    #[test]
    fn oversize_text_is_rejected() {
        let mut w = StructWriter::new(Vec::new(), TextEncoding::utf8());
        let long = "x".repeat(256);
        assert!(w.write_tiny_text(&long).is_err());
        let very_long = "x".repeat(65536);
        assert!(w.write_text(&very_long).is_err());
    }

    #[test]
    fn unknown_encoding_label() {
        assert!(TextEncoding::for_label("utf-8").is_some());
        assert!(TextEncoding::for_label("no-such-encoding").is_none());
    }
}
