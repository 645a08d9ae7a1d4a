//! Positional indexes: a count, an array of positions, and item bodies.
//!
//! Both the reference index and the store share this shape, differing only
//! in position width and item grammar:
//!
//! ```text
//! [count][pos 0][pos 1]...[pos count-1][item bodies...]
//! ```
//!
//! `data_offset` is the first byte after the position table; each stored
//! position is relative to it.  Random access is O(1) plus decode cost.
//! A list serializes every `seek + read + decode` sequence behind its own
//! mutex so concurrent callers can share the single underlying cursor.

use std::io::{Read, Seek};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::codec::StructReader;
use crate::collate::SortKeyGen;
use crate::error::{Result, SlobError};

/// Decodes one item at the reader's current position.
pub trait ItemDecode {
    type Item;
    fn decode_item<R: Read + Seek>(&self, reader: &mut StructReader<R>) -> Result<Self::Item>;
}

/// Width of one entry in the position table.
#[derive(Debug, Clone, Copy)]
pub enum PosWidth {
    U32,
    U64,
}

impl PosWidth {
    fn size(self) -> u64 {
        match self {
            PosWidth::U32 => 4,
            PosWidth::U64 => 8,
        }
    }
}

/// Where the item count comes from: a length prefix at the list offset, or
/// a value the caller already knows (temp streams carry no prefix).
#[derive(Debug, Clone, Copy)]
pub enum CountSource {
    ReadU32,
    Literal(u32),
}

pub struct ItemList<R, D> {
    reader: Mutex<StructReader<R>>,
    count: u32,
    pos_offset: u64,
    pos_width: PosWidth,
    data_offset: u64,
    decoder: D,
}

impl<R: Read + Seek, D: ItemDecode> ItemList<R, D> {
    pub fn new(
        mut reader: StructReader<R>,
        offset: u64,
        count: CountSource,
        pos_width: PosWidth,
        decoder: D,
    ) -> Result<Self> {
        reader.seek(offset)?;
        let count = match count {
            CountSource::ReadU32 => reader.read_u32()?,
            CountSource::Literal(n) => n,
        };
        let pos_offset = reader.position()?;
        let data_offset = pos_offset + pos_width.size() * count as u64;
        Ok(Self {
            reader: Mutex::new(reader),
            count,
            pos_offset,
            pos_width,
            data_offset,
            decoder,
        })
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The i-th entry of the position table.
    pub fn pos(&self, i: u32) -> Result<u64> {
        if i >= self.count {
            return Err(SlobError::OutOfRange(i as u64));
        }
        let mut reader = self.reader.lock().unwrap();
        reader.seek(self.pos_offset + self.pos_width.size() * i as u64)?;
        match self.pos_width {
            PosWidth::U32 => Ok(reader.read_u32()? as u64),
            PosWidth::U64 => reader.read_u64().map_err(Into::into),
        }
    }

    /// Decode the item whose body starts `pos` bytes into the data region.
    pub fn read_at(&self, pos: u64) -> Result<D::Item> {
        let mut reader = self.reader.lock().unwrap();
        reader.seek(self.data_offset + pos)?;
        self.decoder.decode_item(&mut reader)
    }

    pub fn get(&self, i: u32) -> Result<D::Item> {
        let pos = self.pos(i)?;
        self.read_at(pos)
    }
}

// ── Refs ─────────────────────────────────────────────────────────────────────

/// A locator: one key pointing into the store.  Frozen once the file is
/// finalized.  Serde derives exist for the writer's internal alias
/// resolution streams; refs are never serialized this way on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub key: String,
    pub bin_index: u32,
    pub item_index: u16,
    pub fragment: String,
}

pub struct RefDecoder;

impl ItemDecode for RefDecoder {
    type Item = Ref;

    fn decode_item<R: Read + Seek>(&self, reader: &mut StructReader<R>) -> Result<Ref> {
        let key = reader.read_text()?;
        let bin_index = reader.read_u32()?;
        let item_index = reader.read_u16()?;
        let fragment = reader.read_tiny_text()?;
        Ok(Ref { key, bin_index, item_index, fragment })
    }
}

const REF_CACHE_CAPACITY: usize = 512;

/// The reference index: u32 count, u64 positions, [`Ref`] bodies, plus an
/// LRU of recently decoded refs (binary search touches neighbors
/// repeatedly).
pub struct RefList<R> {
    list: ItemList<R, RefDecoder>,
    cache: Mutex<LruCache<u32, Ref>>,
}

impl<R: Read + Seek> RefList<R> {
    /// `count` is `None` for finalized files (the count prefix is part of
    /// the layout) and `Some` for the writer's headerless temp streams.
    pub fn new(reader: StructReader<R>, offset: u64, count: Option<u32>) -> Result<Self> {
        let count = match count {
            Some(n) => CountSource::Literal(n),
            None => CountSource::ReadU32,
        };
        Ok(Self {
            list: ItemList::new(reader, offset, count, PosWidth::U64, RefDecoder)?,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(REF_CACHE_CAPACITY).unwrap(),
            )),
        })
    }

    pub fn len(&self) -> u32 {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn pos(&self, i: u32) -> Result<u64> {
        self.list.pos(i)
    }

    pub fn get(&self, i: u32) -> Result<Ref> {
        if let Some(r) = self.cache.lock().unwrap().get(&i) {
            return Ok(r.clone());
        }
        let r = self.list.get(i)?;
        self.cache.lock().unwrap().put(i, r.clone());
        Ok(r)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Ref>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Index of the first ref whose collated key is `>= wanted`.
    pub fn bisect_left(&self, gen: &SortKeyGen, wanted: &[u8]) -> Result<u32> {
        let mut lo = 0u32;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let r = self.get(mid)?;
            if gen.sort_key(&r.key)?.as_slice() < wanted {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// First ref whose key collates equal to `key` under `gen`, if any.
    pub fn first_match(&self, gen: &SortKeyGen, key: &str) -> Result<Option<Ref>> {
        let wanted = gen.sort_key(key)?;
        let i = self.bisect_left(gen, &wanted)?;
        if i < self.len() {
            let r = self.get(i)?;
            if gen.sort_key(&r.key)? == wanted {
                return Ok(Some(r));
            }
        }
        Ok(None)
    }
}
