//! # slob — SLOB dictionary container format reference implementation
//!
//! A single-file, read-optimized, compressed key→blob dictionary with
//! locale-aware ordering, multi-key aliasing, and content typing, designed
//! to back offline reference applications.
//!
//! Format guarantees (frozen):
//! - All multi-byte integers are big-endian; never negotiated
//! - The prelude starts with the 8-byte magic `"!-1SLOB\x1F"` and a random
//!   v4 UUID assigned at finalize
//! - Compression is file-wide and named in the header: identity, zlib,
//!   bz2, or raw LZMA2; unknown names fail the open, no fallback
//! - Refs are persisted in ICU IDENTICAL-strength sort key order with
//!   SHIFTED alternate handling, so lookups at any weaker strength binary
//!   search the same order
//! - Blobs are grouped into bins compressed as one unit; a blob address is
//!   `(bin_index u32, item_index u16)`, melded into a 48-bit id
//! - Tag values are padded to 255 bytes and are the only bytes that may be
//!   rewritten after finalization
//! - A file may be split into parts; readers see the concatenation
//!
//! Reading: [`Slob::open`] (or [`open`]) → indexed access, iteration in
//! collated order, and [`Slob::as_dict`] for collation-aware lookup.
//! Writing: [`Writer::create`] → `add`/`add_alias`/`tag` → `finalize`.

pub mod codec;
pub mod collate;
pub mod compress;
pub mod error;
pub mod header;
pub mod itemlist;
pub mod mime;
pub mod reader;
pub mod span;
pub mod store;
pub mod writer;

// Flat re-exports for the most common types.
pub use codec::{
    StructReader, StructWriter, TextEncoding, MAX_BIN_ITEM_COUNT, MAX_LARGE_BYTE_STRING_LEN,
    MAX_TEXT_LEN, MAX_TINY_TEXT_LEN,
};
pub use collate::{sort_key_gen, SortKeyGen, Strength};
pub use compress::{Compression, DEFAULT_COMPRESSION};
pub use error::{Result, SlobError};
pub use header::{read_header, set_tag_value, Header, MAGIC};
pub use itemlist::{ItemList, Ref, RefList};
pub use mime::mime_type_for_extension;
pub use reader::{find_parts, meld, open, unmeld, Blob, Dict, DictIter, Slob};
pub use span::MultiFileSpan;
pub use store::{Store, StoreItem};
pub use writer::{
    Key, Writer, WriterEvent, WriterObserver, WriterOptions, DEFAULT_MAX_REDIRECTS,
    DEFAULT_MIN_BIN_SIZE,
};
