//! Crate-wide error type.
//!
//! Reader-side kinds (`UnknownFileFormat`, `UnknownCompression`,
//! `UnknownEncoding`, `IncorrectFileSize`) are fatal for the handle that
//! produced them.  Writer-side key/content validation never surfaces here:
//! oversize inputs are reported through the observer channel and dropped.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlobError>;

#[derive(Error, Debug)]
pub enum SlobError {
    #[error("Not a SLOB file (bad magic)")]
    UnknownFileFormat,
    #[error("Unknown compression {0:?}")]
    UnknownCompression(String),
    #[error("Unknown encoding {0:?}")]
    UnknownEncoding(String),
    /// The header declares a total size that does not match the bytes on
    /// disk.  Raised at open, not on individual reads.
    #[error("File size should be {declared}, {actual} bytes found")]
    IncorrectFileSize { declared: u64, actual: u64 },
    #[error("Tag not found: {0}")]
    TagNotFound(String),
    #[error("File already exists: {0}")]
    FileExists(PathBuf),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    #[error("Index {0} out of range")]
    OutOfRange(u64),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Collator error: {0}")]
    Collator(String),
    #[error("Malformed data: {0}")]
    Malformed(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
