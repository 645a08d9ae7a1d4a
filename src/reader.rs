//! The reader: header + reference index + store behind one handle.
//!
//! A `Slob` owns two independent [`MultiFileSpan`] cursors over the same
//! file list, one for ref traversal and one for store decompression, so
//! the two access paths never contend on a single file position.
//!
//! Blobs are lazy: indexing yields a [`Blob`] that knows its location and
//! fetches content type and content on demand, memoizing the content
//! fetch exactly once.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::codec::StructReader;
use crate::collate::{sort_key_gen, SortKeyGen, Strength};
use crate::compress::Compression;
use crate::error::{Result, SlobError};
use crate::header::{read_header, Header};
use crate::itemlist::RefList;
use crate::span::MultiFileSpan;
use crate::store::Store;

/// Combine a ref's location into one 48-bit blob id.
pub fn meld(bin_index: u32, item_index: u16) -> u64 {
    ((bin_index as u64) << 16) | item_index as u64
}

/// Split a blob id back into `(bin_index, item_index)`.
pub fn unmeld(blob_id: u64) -> (u32, u16) {
    ((blob_id >> 16) as u32, (blob_id & 0xFFFF) as u16)
}

pub struct Slob {
    header: Header,
    refs: RefList<MultiFileSpan>,
    store: Arc<Store<MultiFileSpan>>,
}

impl Slob {
    /// Open one file or an ordered list of split parts.
    ///
    /// Any header-level failure (bad magic, unknown encoding or
    /// compression, size mismatch) closes the underlying handles before
    /// propagating.
    pub fn open<P: AsRef<Path>>(filenames: &[P]) -> Result<Self> {
        let mut span = MultiFileSpan::open(filenames)?;
        let header = match read_header(&mut span) {
            Ok(header) => header,
            Err(e) => {
                span.close();
                return Err(e);
            }
        };
        if span.size() != header.size {
            let actual = span.size();
            span.close();
            return Err(SlobError::IncorrectFileSize { declared: header.size, actual });
        }
        log::debug!(
            "opened slob {} ({} refs offset, {} store offset)",
            header.uuid,
            header.refs_offset,
            header.store_offset
        );

        let refs = RefList::new(
            StructReader::new(span, header.encoding),
            header.refs_offset,
            None,
        )?;
        let store_span = MultiFileSpan::open(filenames)?;
        let store = Store::new(
            StructReader::new(store_span, header.encoding),
            header.store_offset,
            header.compression,
            header.content_types.clone(),
        )?;

        Ok(Self { header, refs, store: Arc::new(store) })
    }

    /// Number of refs (keys), not blobs; several refs may share a blob.
    pub fn len(&self) -> u32 {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// The file's identity as lowercase hex without hyphens.
    pub fn id(&self) -> String {
        self.header.uuid.simple().to_string()
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.header.uuid
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.header.tags
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.header
            .tags
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn content_types(&self) -> &[String] {
        &self.header.content_types
    }

    pub fn blob_count(&self) -> u32 {
        self.header.blob_count
    }

    pub fn encoding(&self) -> &str {
        &self.header.encoding_name
    }

    pub fn compression(&self) -> Compression {
        self.header.compression
    }

    /// The blob behind the i-th ref, in stored (collated) order.
    pub fn blob_at(&self, i: u32) -> Result<Blob> {
        let r = self.refs.get(i)?;
        Ok(Blob {
            id: meld(r.bin_index, r.item_index),
            key: r.key,
            fragment: r.fragment,
            bin_index: r.bin_index,
            item_index: r.item_index,
            store: Arc::clone(&self.store),
            content: OnceCell::new(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Blob>> + '_ {
        (0..self.len()).map(move |i| self.blob_at(i))
    }

    /// Direct store access by blob id, bypassing the reference index.
    pub fn get(&self, blob_id: u64) -> Result<(String, Vec<u8>)> {
        let (bin_index, item_index) = unmeld(blob_id);
        self.store.get(bin_index, item_index)
    }

    /// A collation-keyed view of the refs at the given strength.  Weaker
    /// strengths widen matches (PRIMARY folds case and accents); IDENTICAL
    /// yields exact matches only.
    pub fn as_dict(&self, strength: Strength, max_length: Option<usize>) -> Result<Dict<'_>> {
        Ok(Dict { slob: self, gen: sort_key_gen(strength, max_length)? })
    }

    /// Convenience lookup at TERTIARY strength.
    pub fn lookup<'a>(&'a self, key: &str) -> Result<DictIter<'a>> {
        self.as_dict(Strength::Tertiary, None)?.get(key)
    }

    pub(crate) fn refs(&self) -> &RefList<MultiFileSpan> {
        &self.refs
    }

    /// Drop the handle.  Equivalent to letting the value fall out of
    /// scope; provided for symmetry with the writer.
    pub fn close(self) {}
}

/// Open one file or an ordered list of split parts.
pub fn open<P: AsRef<Path>>(filenames: &[P]) -> Result<Slob> {
    Slob::open(filenames)
}

// ── Blob ─────────────────────────────────────────────────────────────────────

/// A lazily fetched blob.  `content_type` reads entry metadata only;
/// `content` decompresses the containing bin on first use and memoizes the
/// result for the lifetime of this handle.
pub struct Blob {
    id: u64,
    key: String,
    fragment: String,
    bin_index: u32,
    item_index: u16,
    store: Arc<Store<MultiFileSpan>>,
    content: OnceCell<(String, Vec<u8>)>,
}

impl Blob {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn content_type(&self) -> Result<String> {
        self.store.content_type(self.bin_index, self.item_index)
    }

    pub fn content(&self) -> Result<&[u8]> {
        let (_, content) = self
            .content
            .get_or_try_init(|| self.store.get(self.bin_index, self.item_index))?;
        Ok(content)
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("fragment", &self.fragment)
            .finish()
    }
}

// ── Collation dictionary ─────────────────────────────────────────────────────

/// Collation-keyed lookup over a reader's refs.
///
/// Refs are persisted in IDENTICAL-strength order, which refines every
/// weaker strength under SHIFTED alternate handling, so a binary search
/// with a weaker collator still lands on the first of the matching run.
pub struct Dict<'a> {
    slob: &'a Slob,
    gen: Arc<SortKeyGen>,
}

impl<'a> Dict<'a> {
    pub fn len(&self) -> u32 {
        self.slob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slob.is_empty()
    }

    /// All entries whose key collates equal to `key`, as a lazy cursor
    /// over the adjacent matching refs.
    pub fn get(&self, key: &str) -> Result<DictIter<'a>> {
        let wanted = self.gen.sort_key(key)?;
        let index = self.slob.refs().bisect_left(&self.gen, &wanted)?;
        Ok(DictIter { slob: self.slob, gen: Arc::clone(&self.gen), wanted, index })
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        match self.get(key)?.next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }
}

/// Cursor yielded by [`Dict::get`]; reads refs only as consumed and stops
/// at the first non-matching collated key.
pub struct DictIter<'a> {
    slob: &'a Slob,
    gen: Arc<SortKeyGen>,
    wanted: Vec<u8>,
    index: u32,
}

impl Iterator for DictIter<'_> {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.slob.len() {
            return None;
        }
        let r = match self.slob.refs().get(self.index) {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        match self.gen.sort_key(&r.key) {
            Ok(key) if key == self.wanted => {
                self.index += 1;
                Some(self.slob.blob_at(self.index - 1))
            }
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

// ── Part discovery ───────────────────────────────────────────────────────────

/// All files in `name`'s directory whose basenames start with
/// `basename(name)`, sorted.  Used to discover multi-file splits.
pub fn find_parts<P: AsRef<Path>>(name: P) -> io::Result<Vec<PathBuf>> {
    let name = name.as_ref();
    let dir = match name.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => Path::new("."),
    };
    let basename = name
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut parts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&basename) {
            parts.push(entry.path());
        }
    }
    parts.sort();
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meld_unmeld_round_trip() {
        for (bin_index, item_index) in [(0u32, 0u16), (1, 2), (0xFFFF_FFFF, 0xFFFF), (7, 65535)] {
            assert_eq!(unmeld(meld(bin_index, item_index)), (bin_index, item_index));
        }
    }

    #[test]
    fn find_parts_discovers_siblings() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["dict.slob", "dict.slob.1", "dict.slob.2", "other.slob"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let parts = find_parts(dir.path().join("dict.slob")).unwrap();
        let names: Vec<String> = parts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["dict.slob", "dict.slob.1", "dict.slob.2"]);
    }
}
