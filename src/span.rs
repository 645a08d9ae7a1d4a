//! Multi-file span — an ordered list of files presented as one seekable
//! byte stream.
//!
//! SLOB files may be physically split into parts (`name.slob`,
//! `name.slob.1`, ...).  The span computes cumulative byte ranges at open
//! and routes every read to the file containing the cursor, continuing
//! into the next part until the request is satisfied or the last part is
//! exhausted.  Every layer above works against `Read + Seek` and stays
//! oblivious to the splits.
//!
//! Seeks beyond the end are legal (the stream is logically sparse); reads
//! there simply return zero bytes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

pub struct MultiFileSpan {
    files: Vec<File>,
    ranges: Vec<Range<u64>>,
    size: u64,
    offset: u64,
}

impl MultiFileSpan {
    /// Open `filenames` in order.  The span's size is the sum of the file
    /// sizes at open time.
    pub fn open<P: AsRef<Path>>(filenames: &[P]) -> io::Result<Self> {
        let mut files = Vec::with_capacity(filenames.len());
        let mut ranges = Vec::with_capacity(filenames.len());
        let mut offset = 0u64;
        for name in filenames {
            let file = File::open(name)?;
            let len = file.metadata()?.len();
            ranges.push(offset..offset + len);
            files.push(file);
            offset += len;
        }
        Ok(Self { files, ranges, size: offset, offset: 0 })
    }

    /// Total byte length across all parts.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Drop all underlying handles.  Subsequent reads return zero bytes.
    pub fn close(&mut self) {
        self.files.clear();
        self.ranges.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.ranges.is_empty()
    }

    fn locate(&self, offset: u64) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(&offset))
    }
}

impl Read for MultiFileSpan {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let index = match self.locate(self.offset) {
                Some(i) => i,
                None => break, // past the end or closed
            };
            let local = self.offset - self.ranges[index].start;
            let file = &mut self.files[index];
            file.seek(SeekFrom::Start(local))?;
            let n = file.read(&mut buf[written..])?;
            if n == 0 {
                // The file shrank underneath us; report what we have.
                break;
            }
            written += n;
            self.offset += n as u64;
        }
        Ok(written)
    }
}

impl Seek for MultiFileSpan {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(o) => o as i128,
            SeekFrom::Current(d) => self.offset as i128 + d as i128,
            SeekFrom::End(d) => self.size as i128 + d as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            ));
        }
        self.offset = target as u64;
        Ok(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_parts(dir: &TempDir, parts: &[&[u8]]) -> Vec<std::path::PathBuf> {
        parts
            .iter()
            .enumerate()
            .map(|(i, data)| {
                let path = dir.path().join(format!("part-{i}"));
                std::fs::File::create(&path).unwrap().write_all(data).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn concatenates_parts() {
        let dir = TempDir::new().unwrap();
        let paths = write_parts(&dir, &[b"abc", b"", b"defgh"]);
        let mut span = MultiFileSpan::open(&paths).unwrap();
        assert_eq!(span.size(), 8);

        let mut all = Vec::new();
        span.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"abcdefgh");
    }

    #[test]
    fn reads_across_boundaries() {
        let dir = TempDir::new().unwrap();
        let paths = write_parts(&dir, &[b"abc", b"defgh"]);
        let mut span = MultiFileSpan::open(&paths).unwrap();

        span.seek(SeekFrom::Start(2)).unwrap();
        let mut buf = [0u8; 4];
        span.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"cdef");
        assert_eq!(span.tell(), 6);
    }

    #[test]
    fn sparse_seek_reads_short() {
        let dir = TempDir::new().unwrap();
        let paths = write_parts(&dir, &[b"abc"]);
        let mut span = MultiFileSpan::open(&paths).unwrap();

        span.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(span.read(&mut buf).unwrap(), 0);

        span.seek(SeekFrom::End(-1)).unwrap();
        assert_eq!(span.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'c');
    }

    #[test]
    fn close_drops_handles() {
        let dir = TempDir::new().unwrap();
        let paths = write_parts(&dir, &[b"abc"]);
        let mut span = MultiFileSpan::open(&paths).unwrap();
        assert!(!span.is_closed());
        span.close();
        assert!(span.is_closed());
        let mut buf = [0u8; 4];
        assert_eq!(span.read(&mut buf).unwrap(), 0);
    }

    proptest! {
        // Reading the span in arbitrary chunk sizes must equal reading the
        // concatenation of the parts in one go.
        #[test]
        fn chunked_reads_match_concatenation(
            parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..5),
            chunk in 1usize..16,
        ) {
            let dir = TempDir::new().unwrap();
            let slices: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
            let paths = write_parts(&dir, &slices);
            let expected: Vec<u8> = parts.concat();

            let mut span = MultiFileSpan::open(&paths).unwrap();
            let mut got = Vec::new();
            let mut buf = vec![0u8; chunk];
            loop {
                let n = span.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                got.extend_from_slice(&buf[..n]);
            }
            prop_assert_eq!(got, expected);
        }
    }
}
