//! Two-pass writer: accumulate into temp streams, then assemble.
//!
//! # Build session
//! A unique temp directory holds four append-only streams: `ref-positions`
//! (u64s), `refs` (variable width), `store-positions` (u64s), and `store`
//! (compressed bins).  Blobs accumulate in an in-memory bin until it
//! crosses `min_bin_size` or the 65535 item cap, then the bin is
//! compressed and appended to the store stream.
//!
//! Aliases go through a nested writer (compression disabled, no redirects)
//! sharing the temp directory; at finalize they are resolved against the
//! sorted primary refs and appended as ordinary refs.
//!
//! # Finalize
//! Refs are sorted by IDENTICAL-strength ICU sort key, aliases resolved,
//! and the output assembled in one pass: the header's `store_offset` and
//! `file_size` are computed from temp stream byte lengths before any body
//! is copied, so the declared size always matches the bytes written.
//!
//! Oversize inputs never abort a call; they are reported through the
//! observer and dropped.  `close` (and drop) releases the temp directory
//! without finalizing, leaving the target zero-length.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use uuid::Uuid;

use crate::codec::{
    StructReader, StructWriter, TextEncoding, MAX_BIN_ITEM_COUNT, MAX_LARGE_BYTE_STRING_LEN,
    MAX_TEXT_LEN, MAX_TINY_TEXT_LEN,
};
use crate::collate::{sort_key_gen, Strength};
use crate::compress::{Compression, DEFAULT_COMPRESSION};
use crate::error::{Result, SlobError};
use crate::header::MAGIC;
use crate::itemlist::{Ref, RefList};
use crate::reader::Slob;
use crate::span::MultiFileSpan;

pub const DEFAULT_MIN_BIN_SIZE: usize = 512 * 1024;
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

// ── Keys ─────────────────────────────────────────────────────────────────────

/// A lookup key with an optional intra-blob fragment anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub key: String,
    pub fragment: String,
}

impl Key {
    pub fn new(key: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self { key: key.into(), fragment: fragment.into() }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::new(key, "")
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::new(key, "")
    }
}

impl From<(&str, &str)> for Key {
    fn from((key, fragment): (&str, &str)) -> Self {
        Key::new(key, fragment)
    }
}

/// Serialized alias target.  The encoding is internal to the build
/// session; it never appears in a finalized file.  A missing fragment
/// means "inherit the fragment accumulated along the chain".
#[derive(Serialize, Deserialize)]
struct AliasTarget {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fragment: Option<String>,
}

impl From<Key> for AliasTarget {
    fn from(key: Key) -> Self {
        let fragment = if key.fragment.is_empty() { None } else { Some(key.fragment) };
        Self { key: key.key, fragment }
    }
}

fn read_alias_target(content: &[u8], default_fragment: &str) -> Result<(String, String)> {
    let target: AliasTarget = serde_json::from_slice(content)?;
    let fragment = target.fragment.unwrap_or_else(|| default_fragment.to_string());
    Ok((target.key, fragment))
}

// ── Observer protocol ────────────────────────────────────────────────────────

/// Events the writer reports while building.  Delivery is best-effort and
/// purely informational; an observer can never abort the build.
#[derive(Debug)]
pub enum WriterEvent<'a> {
    TagNameTooLong { name: &'a str },
    TagValueTooLong { name: &'a str },
    ContentTooLong { length: usize },
    ContentTypeTooLong { content_type: &'a str },
    KeyTooLong { key: &'a Key },
    AliasTooLong { key: &'a Key },
    AliasTargetTooLong { key: &'a Key },
    BeginSort,
    EndSort,
    BeginResolveAliases,
    EndResolveAliases,
    TooManyRedirects { key: &'a str },
    AliasTargetNotFound { key: &'a str },
    BeginMove { path: &'a Path },
    EndMove { path: &'a Path },
    BeginFinalize,
    EndFinalize,
}

impl WriterEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            WriterEvent::TagNameTooLong { .. } => "tag_name_too_long",
            WriterEvent::TagValueTooLong { .. } => "tag_value_too_long",
            WriterEvent::ContentTooLong { .. } => "content_too_long",
            WriterEvent::ContentTypeTooLong { .. } => "content_type_too_long",
            WriterEvent::KeyTooLong { .. } => "key_too_long",
            WriterEvent::AliasTooLong { .. } => "alias_too_long",
            WriterEvent::AliasTargetTooLong { .. } => "alias_target_too_long",
            WriterEvent::BeginSort => "begin_sort",
            WriterEvent::EndSort => "end_sort",
            WriterEvent::BeginResolveAliases => "begin_resolve_aliases",
            WriterEvent::EndResolveAliases => "end_resolve_aliases",
            WriterEvent::TooManyRedirects { .. } => "too_many_redirects",
            WriterEvent::AliasTargetNotFound { .. } => "alias_target_not_found",
            WriterEvent::BeginMove { .. } => "begin_move",
            WriterEvent::EndMove { .. } => "end_move",
            WriterEvent::BeginFinalize => "begin_finalize",
            WriterEvent::EndFinalize => "end_finalize",
        }
    }
}

/// Sink for [`WriterEvent`]s.  Implemented for any `Fn(&WriterEvent)`.
pub trait WriterObserver {
    fn notify(&self, event: &WriterEvent<'_>);
}

impl<F: Fn(&WriterEvent<'_>)> WriterObserver for F {
    fn notify(&self, event: &WriterEvent<'_>) {
        self(event)
    }
}

// ── Bin builder ──────────────────────────────────────────────────────────────

/// Accumulates blobs for one bin: an item directory of u32 offsets and the
/// u32-length-prefixed bodies, compressed together at flush.
struct BinBuilder {
    content_type_ids: Vec<u8>,
    item_dir: Vec<u8>,
    items: Vec<u8>,
    current_offset: u32,
}

impl BinBuilder {
    fn new() -> Self {
        Self {
            content_type_ids: Vec::new(),
            item_dir: Vec::new(),
            items: Vec::new(),
            current_offset: 0,
        }
    }

    fn add(&mut self, content_type_id: u8, blob: &[u8]) {
        self.content_type_ids.push(content_type_id);
        self.item_dir.extend_from_slice(&self.current_offset.to_be_bytes());
        self.items.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        self.items.extend_from_slice(blob);
        self.current_offset += (4 + blob.len()) as u32;
    }

    fn len(&self) -> usize {
        self.content_type_ids.len()
    }

    /// Uncompressed payload bytes accumulated so far.
    fn payload_size(&self) -> u32 {
        self.current_offset
    }

    fn finalize<W: Write>(mut self, out: &mut StructWriter<W>, compression: Compression) -> Result<()> {
        out.write_u32(self.len() as u32)?;
        out.write_all(&self.content_type_ids)?;
        let mut content = std::mem::take(&mut self.item_dir);
        content.append(&mut self.items);
        let compressed = compression.compress(&content)?;
        out.write_u32(compressed.len() as u32)?;
        out.write_all(&compressed)?;
        Ok(())
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Parent directory for the build session's temp directory.  Defaults
    /// to the system temp location.
    pub workdir: Option<PathBuf>,
    pub encoding: String,
    pub compression: Compression,
    /// A bin is flushed once its uncompressed payload exceeds this.
    pub min_bin_size: usize,
    /// Longest alias chain followed at finalize; 0 disables aliases.
    pub max_redirects: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            workdir: None,
            encoding: "utf-8".to_string(),
            compression: DEFAULT_COMPRESSION,
            min_bin_size: DEFAULT_MIN_BIN_SIZE,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// The build session's owned temp streams.  Present from create until
/// finalize or close; every public operation that touches disk goes
/// through here.
struct TempStreams {
    dir: TempDir,
    ref_positions: StructWriter<BufWriter<File>>,
    refs: StructWriter<BufWriter<File>>,
    store_positions: StructWriter<BufWriter<File>>,
    store: StructWriter<BufWriter<File>>,
    aliases: Option<Box<Writer>>,
}

pub struct Writer {
    filename: PathBuf,
    encoding_name: String,
    encoding: TextEncoding,
    compression: Compression,
    min_bin_size: usize,
    max_redirects: usize,
    observer: Option<Box<dyn WriterObserver>>,
    state: Option<TempStreams>,
    content_types: Vec<String>,
    current_bin: Option<BinBuilder>,
    blob_count: u32,
    ref_count: u32,
    bin_count: u32,
    tags: Vec<(String, String)>,
}

impl Writer {
    /// Start a build session.  `filename` must not exist; it is created
    /// empty immediately and stays empty until `finalize`.
    pub fn create<P: AsRef<Path>>(filename: P, options: WriterOptions) -> Result<Self> {
        let filename = filename.as_ref().to_path_buf();
        if filename.exists() {
            return Err(SlobError::FileExists(filename));
        }
        let encoding = TextEncoding::for_label(&options.encoding)
            .ok_or_else(|| SlobError::UnknownEncoding(options.encoding.clone()))?;
        if !encoding.is_encodable() {
            return Err(SlobError::UnknownEncoding(options.encoding));
        }

        // Claim the target up front so permission problems surface before
        // any content is accepted.
        File::create(&filename)?;

        let basename = filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "slob".to_string());
        let mut builder = tempfile::Builder::new();
        let prefix = format!("{basename}-");
        builder.prefix(&prefix);
        let dir = match &options.workdir {
            Some(workdir) => builder.tempdir_in(workdir)?,
            None => builder.tempdir()?,
        };

        let open_stream = |name: &str| -> Result<StructWriter<BufWriter<File>>> {
            Ok(StructWriter::new(
                BufWriter::new(File::create(dir.path().join(name))?),
                encoding,
            ))
        };
        let ref_positions = open_stream("ref-positions")?;
        let refs = open_stream("refs")?;
        let store_positions = open_stream("store-positions")?;
        let store = open_stream("store")?;

        let aliases = if options.max_redirects > 0 {
            Some(Box::new(Writer::create(
                dir.path().join("aliases"),
                WriterOptions {
                    workdir: Some(dir.path().to_path_buf()),
                    encoding: options.encoding.clone(),
                    compression: Compression::Identity,
                    min_bin_size: options.min_bin_size,
                    max_redirects: 0,
                },
            )?))
        } else {
            None
        };

        let tags = vec![
            ("version.slob".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            (
                "created.at".to_string(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
        ];

        Ok(Self {
            filename,
            encoding_name: options.encoding,
            encoding,
            compression: options.compression,
            min_bin_size: options.min_bin_size,
            max_redirects: options.max_redirects,
            observer: None,
            state: Some(TempStreams {
                dir,
                ref_positions,
                refs,
                store_positions,
                store,
                aliases,
            }),
            content_types: Vec::new(),
            current_bin: None,
            blob_count: 0,
            ref_count: 0,
            bin_count: 0,
            tags,
        })
    }

    pub fn set_observer(&mut self, observer: Box<dyn WriterObserver>) {
        self.observer = Some(observer);
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Tags pending for the header, including the seeded defaults.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn fire(&self, event: WriterEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer.notify(&event);
        }
    }

    fn state(&mut self) -> Result<&mut TempStreams> {
        self.state
            .as_mut()
            .ok_or(SlobError::UnsupportedOperation("writer is finalized or closed"))
    }

    fn temp_dir_path(&self) -> Result<&Path> {
        self.state
            .as_ref()
            .map(|st| st.dir.path())
            .ok_or(SlobError::UnsupportedOperation("writer is finalized or closed"))
    }

    fn key_fits(&self, key: &Key) -> bool {
        self.encoding.encode(&key.key).len() <= MAX_TEXT_LEN
            && self.encoding.encode(&key.fragment).len() <= MAX_TINY_TEXT_LEN
    }

    /// Set a header tag.  Oversize names are dropped and oversize values
    /// cleared, with observer notification; neither is an error.
    pub fn tag(&mut self, name: &str, value: &str) {
        if self.encoding.encode(name).len() > MAX_TINY_TEXT_LEN {
            self.fire(WriterEvent::TagNameTooLong { name });
            return;
        }
        let mut value = value;
        if self.encoding.encode(value).len() > MAX_TINY_TEXT_LEN {
            self.fire(WriterEvent::TagValueTooLong { name });
            value = "";
        }
        match self.tags.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.tags.push((name.to_string(), value.to_string())),
        }
    }

    fn intern_content_type(&mut self, content_type: &str) -> Result<u8> {
        if let Some(i) = self.content_types.iter().position(|t| t == content_type) {
            return Ok(i as u8);
        }
        // The header's content type count is a u8.
        if self.content_types.len() >= u8::MAX as usize {
            return Err(SlobError::Malformed("more than 255 content types".to_string()));
        }
        self.content_types.push(content_type.to_string());
        Ok((self.content_types.len() - 1) as u8)
    }

    /// Store `blob` under every key in `keys`.
    ///
    /// Oversize content, content types, or keys are reported through the
    /// observer and skipped; if no key survives, the blob is not stored.
    pub fn add(&mut self, blob: &[u8], keys: &[Key], content_type: &str) -> Result<()> {
        if blob.len() > MAX_LARGE_BYTE_STRING_LEN {
            self.fire(WriterEvent::ContentTooLong { length: blob.len() });
            return Ok(());
        }
        if self.encoding.encode(content_type).len() > MAX_TEXT_LEN {
            self.fire(WriterEvent::ContentTypeTooLong { content_type });
            return Ok(());
        }

        let mut accepted: Vec<&Key> = Vec::with_capacity(keys.len());
        for key in keys {
            if self.key_fits(key) {
                accepted.push(key);
            } else {
                self.fire(WriterEvent::KeyTooLong { key });
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }

        let content_type_id = self.intern_content_type(content_type)?;

        if self.current_bin.is_none() {
            self.bin_count += 1;
        }
        let min_bin_size = self.min_bin_size;
        let bin = self.current_bin.get_or_insert_with(BinBuilder::new);
        bin.add(content_type_id, blob);
        let bin_item_index = (bin.len() - 1) as u16;
        let bin_full =
            bin.payload_size() as usize > min_bin_size || bin.len() == MAX_BIN_ITEM_COUNT;

        let bin_index = self.bin_count - 1;
        self.blob_count += 1;

        for key in &accepted {
            self.write_ref(&key.key, bin_index, bin_item_index, &key.fragment)?;
        }

        if bin_full {
            self.flush_current_bin()?;
        }
        Ok(())
    }

    /// Register `key` as a redirect to `target`.  Chains are resolved at
    /// finalize, up to `max_redirects` hops.
    pub fn add_alias<K: Into<Key>, T: Into<Key>>(&mut self, key: K, target: T) -> Result<()> {
        if self.max_redirects == 0 {
            return Err(SlobError::UnsupportedOperation(
                "add_alias on a writer with max_redirects = 0",
            ));
        }
        let key = key.into();
        let target = target.into();
        if !self.key_fits(&key) {
            self.fire(WriterEvent::AliasTooLong { key: &key });
            return Ok(());
        }
        if !self.key_fits(&target) {
            self.fire(WriterEvent::AliasTargetTooLong { key: &target });
            return Ok(());
        }
        let payload = serde_json::to_vec(&AliasTarget::from(target))?;
        let aliases = match self.state()?.aliases.as_mut() {
            Some(aliases) => aliases,
            None => return Err(SlobError::UnsupportedOperation("alias writer not available")),
        };
        aliases.add(&payload, std::slice::from_ref(&key), "")
    }

    fn write_ref(&mut self, key: &str, bin_index: u32, item_index: u16, fragment: &str) -> Result<()> {
        let st = self.state()?;
        let body_position = st.refs.position();
        st.ref_positions.write_u64(body_position)?;
        st.refs.write_text(key)?;
        st.refs.write_u32(bin_index)?;
        st.refs.write_u16(item_index)?;
        st.refs.write_tiny_text(fragment)?;
        self.ref_count += 1;
        Ok(())
    }

    fn flush_current_bin(&mut self) -> Result<()> {
        if let Some(bin) = self.current_bin.take() {
            let compression = self.compression;
            let st = self.state()?;
            let store_position = st.store.position();
            st.store_positions.write_u64(store_position)?;
            bin.finalize(&mut st.store, compression)?;
        }
        Ok(())
    }

    /// Rewrite `ref-positions` so refs enumerate in IDENTICAL-strength
    /// sort key order, then reopen it for appends.
    fn sort_refs(&mut self) -> Result<()> {
        self.fire(WriterEvent::BeginSort);
        let gen = sort_key_gen(Strength::Identical, None)?;
        let encoding = self.encoding;
        let ref_count = self.ref_count;

        {
            let st = self.state()?;
            st.refs.flush()?;
            st.ref_positions.flush()?;
        }
        let dir = self.temp_dir_path()?.to_path_buf();
        let positions_path = dir.join("ref-positions");
        let refs_path = dir.join("refs");
        let sorted_path = dir.join("ref-positions-sorted");

        {
            let span = MultiFileSpan::open(&[&positions_path, &refs_path])?;
            let ref_list = RefList::new(
                StructReader::new(span, encoding),
                0,
                Some(ref_count),
            )?;
            let mut keyed: Vec<(Vec<u8>, u64)> = Vec::with_capacity(ref_count as usize);
            for i in 0..ref_count {
                let r = ref_list.get(i)?;
                keyed.push((gen.sort_key(&r.key)?, ref_list.pos(i)?));
            }
            // Stable: equal keys keep their add order.
            keyed.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted =
                StructWriter::new(BufWriter::new(File::create(&sorted_path)?), encoding);
            for (_, pos) in &keyed {
                sorted.write_u64(*pos)?;
            }
            sorted.flush()?;
        }

        fs::remove_file(&positions_path)?;
        fs::rename(&sorted_path, &positions_path)?;
        let reopened = StructWriter::new(
            BufWriter::new(OpenOptions::new().append(true).open(&positions_path)?),
            encoding,
        );
        self.state()?.ref_positions = reopened;
        self.fire(WriterEvent::EndSort);
        Ok(())
    }

    /// Follow every alias chain against the sorted primary refs and append
    /// the resolved refs.  Chains deeper than `max_redirects` and targets
    /// that never land on a real key are reported and skipped.
    fn resolve_aliases(&mut self) -> Result<()> {
        self.fire(WriterEvent::BeginResolveAliases);
        let encoding = self.encoding;
        let max_redirects = self.max_redirects;

        let mut aliases_writer = match self.state()?.aliases.take() {
            Some(writer) => writer,
            None => return Ok(()),
        };
        aliases_writer.finalize()?;
        let aliases_path = aliases_writer.filename.clone();

        {
            let st = self.state()?;
            st.refs.flush()?;
            st.ref_positions.flush()?;
        }
        let dir = self.temp_dir_path()?.to_path_buf();
        let positions_path = dir.join("ref-positions");
        let refs_path = dir.join("refs");
        let resolved_path = dir.join("resolved-aliases");

        // Resolved refs are routed through a nested writer so they come
        // back in sorted order with duplicate keys adjacent.
        let mut resolved_writer = Writer::create(
            &resolved_path,
            WriterOptions {
                workdir: Some(dir.clone()),
                encoding: self.encoding_name.clone(),
                compression: Compression::Identity,
                min_bin_size: self.min_bin_size,
                max_redirects: 0,
            },
        )?;

        {
            let span = MultiFileSpan::open(&[&positions_path, &refs_path])?;
            let ref_list = RefList::new(
                StructReader::new(span, encoding),
                0,
                Some(self.ref_count),
            )?;
            let tertiary = sort_key_gen(Strength::Tertiary, None)?;

            let aliases_slob = Slob::open(&[&aliases_path])?;
            let aliases_dict = aliases_slob.as_dict(Strength::Tertiary, None)?;

            for i in 0..aliases_slob.len() {
                let item = aliases_slob.blob_at(i)?;
                let from_key = item.key().to_string();
                let mut seen_keys = vec![from_key.clone()];
                let (mut to_key, mut fragment) =
                    read_alias_target(item.content()?, item.fragment())?;

                let mut hops = 0usize;
                while hops <= max_redirects {
                    // Is the current target itself an alias?
                    let next = match aliases_dict.get(&to_key)?.next() {
                        Some(next) => next?,
                        None => break,
                    };
                    let previous = to_key.clone();
                    let (next_key, next_fragment) = read_alias_target(next.content()?, &fragment)?;
                    to_key = next_key;
                    fragment = next_fragment;
                    hops += 1;
                    if !seen_keys.contains(&previous) {
                        seen_keys.push(previous);
                    }
                }
                if hops > max_redirects {
                    self.fire(WriterEvent::TooManyRedirects { key: &from_key });
                }

                match ref_list.first_match(&tertiary, &to_key)? {
                    None => self.fire(WriterEvent::AliasTargetNotFound { key: &to_key }),
                    Some(target) => {
                        for key in &seen_keys {
                            let resolved = Ref {
                                key: key.clone(),
                                bin_index: target.bin_index,
                                item_index: target.item_index,
                                // The last non-empty fragment in the chain wins.
                                fragment: if target.fragment.is_empty() {
                                    fragment.clone()
                                } else {
                                    target.fragment.clone()
                                },
                            };
                            let payload = serde_json::to_vec(&resolved)?;
                            let alias_key = Key::from(key.as_str());
                            resolved_writer.add(&payload, std::slice::from_ref(&alias_key), "")?;
                        }
                    }
                }
            }
        }
        resolved_writer.finalize()?;

        {
            let resolved_slob = Slob::open(&[&resolved_path])?;
            let mut previous_key: Option<String> = None;
            for i in 0..resolved_slob.len() {
                let item = resolved_slob.blob_at(i)?;
                let resolved: Ref = serde_json::from_slice(item.content()?)?;
                if previous_key.as_deref() == Some(resolved.key.as_str()) {
                    continue;
                }
                self.write_ref(
                    &resolved.key,
                    resolved.bin_index,
                    resolved.item_index,
                    &resolved.fragment,
                )?;
                previous_key = Some(resolved.key);
            }
        }

        self.sort_refs()?;
        self.fire(WriterEvent::EndResolveAliases);
        Ok(())
    }

    /// Sort, resolve aliases, and assemble the output file.  Consumes the
    /// temp directory; the writer accepts no further content.
    pub fn finalize(&mut self) -> Result<()> {
        self.fire(WriterEvent::BeginFinalize);
        self.flush_current_bin()?;
        self.sort_refs()?;
        if self.max_redirects > 0 {
            self.resolve_aliases()?;
        }

        let st = match self.state.take() {
            Some(st) => st,
            None => {
                return Err(SlobError::UnsupportedOperation("writer is finalized or closed"))
            }
        };
        let TempStreams { dir, ref_positions, refs, store_positions, store, aliases } = st;
        drop(aliases);
        for stream in [ref_positions, refs, store_positions, store] {
            finish_stream(stream)?;
        }

        let positions_path = dir.path().join("ref-positions");
        let refs_path = dir.path().join("refs");
        let store_positions_path = dir.path().join("store-positions");
        let store_path = dir.path().join("store");

        let positions_size = fs::metadata(&positions_path)?.len();
        let refs_size = fs::metadata(&refs_path)?.len();
        let store_positions_size = fs::metadata(&store_positions_path)?.len();
        let store_size = fs::metadata(&store_path)?.len();

        let mut out =
            StructWriter::new(BufWriter::new(File::create(&self.filename)?), self.encoding);
        out.write_all(MAGIC)?;
        out.write_all(Uuid::new_v4().as_bytes())?;
        out.write_tiny_text_as(&self.encoding_name, TextEncoding::utf8())?;
        out.write_tiny_text(self.compression.name())?;

        out.write_u8(self.tags.len() as u8)?;
        for (name, value) in &self.tags {
            out.write_tiny_text(name)?;
            out.write_tiny_text_editable(value)?;
        }

        out.write_u8(self.content_types.len() as u8)?;
        for content_type in &self.content_types {
            // Insertion order is id order.
            out.write_text(content_type)?;
        }

        out.write_u32(self.blob_count)?;
        // This u64, the file size u64, and the ref count u32 still precede
        // the ref section; the store section follows both ref streams.
        let store_offset = out.position() + 8 + 8 + 4 + positions_size + refs_size;
        out.write_u64(store_offset)?;
        let file_size = out.position()
            + 8      // this field
            + 2 * 4  // ref count and bin count
            + positions_size
            + refs_size
            + store_positions_size
            + store_size;
        out.write_u64(file_size)?;

        out.write_u32(self.ref_count)?;
        self.move_stream(&mut out, &positions_path)?;
        self.move_stream(&mut out, &refs_path)?;
        out.write_u32(self.bin_count)?;
        self.move_stream(&mut out, &store_positions_path)?;
        self.move_stream(&mut out, &store_path)?;

        out.flush()?;
        drop(out);
        dir.close()?;
        self.fire(WriterEvent::EndFinalize);
        Ok(())
    }

    fn move_stream(&self, out: &mut StructWriter<BufWriter<File>>, path: &Path) -> Result<()> {
        self.fire(WriterEvent::BeginMove { path });
        let mut src = File::open(path)?;
        out.copy_from(&mut src)?;
        drop(src);
        fs::remove_file(path)?;
        self.fire(WriterEvent::EndMove { path });
        Ok(())
    }

    // ── Size accounting ──────────────────────────────────────────────────────

    /// Fixed header bytes: everything except tags, content types, and the
    /// four data sections.
    pub fn size_header(&self) -> u64 {
        let mut size = (MAGIC.len() + 16) as u64;
        size += 1 + TextEncoding::utf8().encode(&self.encoding_name).len() as u64;
        size += 1 + self.encoding.encode(self.compression.name()).len() as u64;
        size += 1; // tag count
        size += 1; // content type count
        size += 4; // blob count
        size += 8; // store offset
        size += 8; // file size
        size += 4; // ref count
        size += 4; // bin count
        size
    }

    /// Bytes the tag section will occupy; values are always padded.
    pub fn size_tags(&self) -> u64 {
        self.tags
            .iter()
            .map(|(name, _)| 1 + self.encoding.encode(name).len() as u64 + MAX_TINY_TEXT_LEN as u64)
            .sum()
    }

    pub fn size_content_types(&self) -> u64 {
        self.content_types
            .iter()
            .map(|content_type| 2 + self.encoding.encode(content_type).len() as u64)
            .sum()
    }

    /// Bytes accumulated in the four temp streams so far.
    pub fn size_data(&mut self) -> Result<u64> {
        let st = self.state()?;
        st.ref_positions.flush()?;
        st.refs.flush()?;
        st.store_positions.flush()?;
        st.store.flush()?;
        let dir = st.dir.path();
        let mut total = 0;
        for name in ["ref-positions", "refs", "store-positions", "store"] {
            total += fs::metadata(dir.join(name))?.len();
        }
        Ok(total)
    }

    /// Release streams and remove the temp directory WITHOUT finalizing.
    /// The target file stays zero-length.  Also runs on drop.
    pub fn close(&mut self) {
        if let Some(st) = self.state.take() {
            log::warn!(
                "closing writer for {} without finalize; output discarded",
                self.filename.display()
            );
            drop(st);
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.state.is_some() {
            self.close();
        }
    }
}

fn finish_stream(stream: StructWriter<BufWriter<File>>) -> Result<()> {
    stream
        .into_inner()
        .into_inner()
        .map_err(|e| SlobError::Io(e.into_error()))?;
    Ok(())
}
