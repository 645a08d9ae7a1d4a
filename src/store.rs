//! Blob store: bin-indexed lookup with per-bin decompression.
//!
//! One store entry holds a whole bin:
//!
//! ```text
//! item count        u32   (build time caps this at 65535; width stays u32)
//! content type ids  count x u8
//! compressed length u32
//! compressed bytes  = compress(item directory ++ item bodies)
//! ```
//!
//! The decompressed payload is itself a positional list: u32 offsets, then
//! u32-length-prefixed blob bodies.  `content_type` answers from the entry
//! metadata alone; only `get` pays for decompression, and decompressed
//! payloads are kept in a small LRU because neighboring blobs usually live
//! in the same bin.

use std::io::{Cursor, Read, Seek};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::codec::{StructReader, TextEncoding};
use crate::compress::Compression;
use crate::error::{Result, SlobError};
use crate::itemlist::{CountSource, ItemDecode, ItemList, PosWidth};

/// One decoded store entry: per-item content type ids plus the still
/// compressed payload.
pub struct StoreItem {
    pub content_type_ids: Vec<u8>,
    pub compressed: Vec<u8>,
}

struct StoreDecoder;

impl ItemDecode for StoreDecoder {
    type Item = StoreItem;

    fn decode_item<R: Read + Seek>(&self, reader: &mut StructReader<R>) -> Result<StoreItem> {
        let item_count = reader.read_u32()? as usize;
        let content_type_ids = reader.read_bytes(item_count)?;
        let compressed_length = reader.read_u32()? as usize;
        let compressed = reader.read_bytes(compressed_length)?;
        Ok(StoreItem { content_type_ids, compressed })
    }
}

struct BlobDecoder;

impl ItemDecode for BlobDecoder {
    type Item = Vec<u8>;

    fn decode_item<R: Read + Seek>(&self, reader: &mut StructReader<R>) -> Result<Vec<u8>> {
        let length = reader.read_u32()? as usize;
        reader.read_bytes(length).map_err(Into::into)
    }
}

const STORE_ITEM_CACHE_CAPACITY: usize = 32;
const BIN_CACHE_CAPACITY: usize = 16;

pub struct Store<R> {
    list: ItemList<R, StoreDecoder>,
    compression: Compression,
    content_types: Vec<String>,
    item_cache: Mutex<LruCache<u32, Arc<StoreItem>>>,
    bin_cache: Mutex<LruCache<u32, Arc<Vec<u8>>>>,
}

impl<R: Read + Seek> Store<R> {
    pub fn new(
        reader: StructReader<R>,
        offset: u64,
        compression: Compression,
        content_types: Vec<String>,
    ) -> Result<Self> {
        Ok(Self {
            list: ItemList::new(reader, offset, CountSource::ReadU32, PosWidth::U64, StoreDecoder)?,
            compression,
            content_types,
            item_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(STORE_ITEM_CACHE_CAPACITY).unwrap(),
            )),
            bin_cache: Mutex::new(LruCache::new(NonZeroUsize::new(BIN_CACHE_CAPACITY).unwrap())),
        })
    }

    /// Number of bins.
    pub fn len(&self) -> u32 {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    fn item(&self, bin_index: u32) -> Result<Arc<StoreItem>> {
        if let Some(item) = self.item_cache.lock().unwrap().get(&bin_index) {
            return Ok(Arc::clone(item));
        }
        let item = Arc::new(self.list.get(bin_index)?);
        self.item_cache.lock().unwrap().put(bin_index, Arc::clone(&item));
        Ok(item)
    }

    /// Content type of one blob, answered from entry metadata without
    /// touching the compressed payload.
    pub fn content_type(&self, bin_index: u32, item_index: u16) -> Result<String> {
        let item = self.item(bin_index)?;
        let id = *item
            .content_type_ids
            .get(item_index as usize)
            .ok_or(SlobError::OutOfRange(item_index as u64))?;
        self.content_types.get(id as usize).cloned().ok_or_else(|| {
            SlobError::Malformed(format!("content type id {id} not declared in header"))
        })
    }

    fn decompressed(&self, bin_index: u32) -> Result<Arc<Vec<u8>>> {
        if let Some(payload) = self.bin_cache.lock().unwrap().get(&bin_index) {
            return Ok(Arc::clone(payload));
        }
        let item = self.item(bin_index)?;
        let payload = Arc::new(self.compression.decompress(&item.compressed)?);
        self.bin_cache.lock().unwrap().put(bin_index, Arc::clone(&payload));
        Ok(payload)
    }

    /// Fetch one blob: `(content_type, bytes)`.
    pub fn get(&self, bin_index: u32, item_index: u16) -> Result<(String, Vec<u8>)> {
        let content_type = self.content_type(bin_index, item_index)?;
        let item = self.item(bin_index)?;
        let payload = self.decompressed(bin_index)?;

        // The payload is a transient positional list over the bin bytes.
        let bin = ItemList::new(
            StructReader::new(Cursor::new(payload.as_slice()), TextEncoding::utf8()),
            0,
            CountSource::Literal(item.content_type_ids.len() as u32),
            PosWidth::U32,
            BlobDecoder,
        )?;
        let blob = bin.get(item_index as u32)?;
        Ok((content_type, blob))
    }
}
