use std::fs;
use std::path::PathBuf;

use slob::{
    meld, set_tag_value, sort_key_gen, Key, Slob, SlobError, Strength, Writer, WriterOptions,
};
use tempfile::TempDir;

fn path_in(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[test]
fn empty_writer_produces_valid_file() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "empty.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    writer.finalize().unwrap();

    // Open verifies the declared file size against the bytes on disk.
    let slob = Slob::open(&[&path]).unwrap();
    assert_eq!(slob.len(), 0);
    assert_eq!(slob.blob_count(), 0);
    assert!(slob.content_types().is_empty());
    assert_eq!(slob.encoding(), "utf-8");
    assert_eq!(slob.compression().name(), "lzma2");
    assert!(slob.tag("created.at").is_some());
    assert!(slob.tag("version.slob").is_some());
    assert_eq!(slob.id().len(), 32);
}

#[test]
fn single_blob_single_key() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "single.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    writer
        .add(b"hello", &[Key::from("greet")], "text/plain")
        .unwrap();
    writer.finalize().unwrap();

    let slob = Slob::open(&[&path]).unwrap();
    assert_eq!(slob.len(), 1);
    assert_eq!(slob.blob_count(), 1);
    let blob = slob.blob_at(0).unwrap();
    assert_eq!(blob.key(), "greet");
    assert_eq!(blob.content_type().unwrap(), "text/plain");
    assert_eq!(blob.content().unwrap(), b"hello");
}

#[test]
fn refusing_to_overwrite_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "exists.slob");
    fs::write(&path, b"occupied").unwrap();
    assert!(matches!(
        Writer::create(&path, WriterOptions::default()),
        Err(SlobError::FileExists(_))
    ));
}

#[test]
fn close_without_finalize_leaves_target_empty() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "abandoned.slob");
    {
        let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
        writer.add(b"data", &[Key::from("key")], "").unwrap();
        // dropped without finalize
    }
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    assert!(Slob::open(&[&path]).is_err());
}

#[test]
fn bin_rollover_by_size() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "rollover.slob");

    let options = WriterOptions { min_bin_size: 1024, ..WriterOptions::default() };
    let mut writer = Writer::create(&path, options).unwrap();
    let blob = vec![0xabu8; 600];
    writer.add(&blob, &[Key::from("k1")], "").unwrap();
    writer.add(&blob, &[Key::from("k2")], "").unwrap(); // crosses 1024, bin flushed
    writer.add(&blob, &[Key::from("k3")], "").unwrap(); // opens bin 1
    writer.finalize().unwrap();

    let slob = Slob::open(&[&path]).unwrap();
    assert_eq!(slob.len(), 3);
    let dict = slob.as_dict(Strength::Tertiary, None).unwrap();
    let ids: Vec<u64> = ["k1", "k2", "k3"]
        .iter()
        .map(|k| {
            dict.get(k)
                .unwrap()
                .next()
                .unwrap()
                .unwrap()
                .id()
        })
        .collect();
    assert_eq!(ids, [meld(0, 0), meld(0, 1), meld(1, 0)]);
    for key in ["k1", "k2", "k3"] {
        let entry = dict.get(key).unwrap().next().unwrap().unwrap();
        assert_eq!(entry.content().unwrap(), blob.as_slice());
    }
}

#[test]
fn bin_rollover_by_item_count() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "count.slob");

    // A bin never grows past 65535 items regardless of size budget.
    let options = WriterOptions {
        min_bin_size: 1_000_000_000,
        compression: slob::Compression::Zlib,
        ..WriterOptions::default()
    };
    let mut writer = Writer::create(&path, options).unwrap();
    for i in 0u32..65536 {
        let key = format!("k{i:05}");
        writer
            .add(&[(i % 251) as u8], &[Key::from(key.as_str())], "")
            .unwrap();
    }
    writer.finalize().unwrap();

    let slob = Slob::open(&[&path]).unwrap();
    assert_eq!(slob.len(), 65536);
    assert_eq!(slob.blob_count(), 65536);

    // The 65536th add must have landed alone in a second bin.
    let dict = slob.as_dict(Strength::Tertiary, None).unwrap();
    let last = dict.get("k65535").unwrap().next().unwrap().unwrap();
    assert_eq!(last.id(), meld(1, 0));
    assert_eq!(last.content().unwrap(), &[(65535 % 251) as u8]);
    let first = dict.get("k00000").unwrap().next().unwrap().unwrap();
    assert_eq!(first.id(), meld(0, 0));
}

#[test]
fn declared_size_matches_disk_and_refs_are_sorted() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "sorted.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    for key in ["zebra", "apple", "Banana", "über", "cherry", "apfel"] {
        writer
            .add(key.as_bytes(), &[Key::from(key)], "text/plain")
            .unwrap();
    }
    writer.finalize().unwrap();

    let mut file = fs::File::open(&path).unwrap();
    let header = slob::read_header(&mut file).unwrap();
    assert_eq!(header.size, fs::metadata(&path).unwrap().len());

    let slob = Slob::open(&[&path]).unwrap();
    let gen = sort_key_gen(Strength::Identical, None).unwrap();
    let keys: Vec<String> = slob
        .iter()
        .map(|blob| blob.unwrap().key().to_string())
        .collect();
    for pair in keys.windows(2) {
        assert!(
            gen.sort_key(&pair[0]).unwrap() <= gen.sort_key(&pair[1]).unwrap(),
            "{:?} stored after {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn blob_id_round_trips_through_get() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "ids.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    for i in 0..20 {
        let key = format!("entry-{i}");
        let content = format!("content number {i}");
        writer
            .add(content.as_bytes(), &[Key::from(key.as_str())], "text/plain")
            .unwrap();
    }
    writer.finalize().unwrap();

    let slob = Slob::open(&[&path]).unwrap();
    for blob in slob.iter() {
        let blob = blob.unwrap();
        let (content_type, content) = slob.get(blob.id()).unwrap();
        assert_eq!(content_type, blob.content_type().unwrap());
        assert_eq!(content, blob.content().unwrap());
    }
}

#[test]
fn split_file_reads_identically() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "whole.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    for i in 0..50 {
        let key = format!("word-{i:02}");
        let content = format!("definition of word {i}").repeat(10);
        writer
            .add(content.as_bytes(), &[Key::from(key.as_str())], "text/html")
            .unwrap();
    }
    writer.finalize().unwrap();

    // Split the produced file into three arbitrary chunks.
    let bytes = fs::read(&path).unwrap();
    let cut_a = bytes.len() / 3;
    let cut_b = 2 * bytes.len() / 3 + 7;
    let parts = [
        path_in(&dir, "part.slob.0"),
        path_in(&dir, "part.slob.1"),
        path_in(&dir, "part.slob.2"),
    ];
    fs::write(&parts[0], &bytes[..cut_a]).unwrap();
    fs::write(&parts[1], &bytes[cut_a..cut_b]).unwrap();
    fs::write(&parts[2], &bytes[cut_b..]).unwrap();

    let whole = Slob::open(&[&path]).unwrap();
    let split = Slob::open(&parts).unwrap();
    assert_eq!(whole.id(), split.id());
    assert_eq!(whole.len(), split.len());
    for i in 0..whole.len() {
        let a = whole.blob_at(i).unwrap();
        let b = split.blob_at(i).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.content().unwrap(), b.content().unwrap());
    }
}

#[test]
fn truncated_file_fails_size_check() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "trunc.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    writer.add(b"payload", &[Key::from("key")], "").unwrap();
    writer.finalize().unwrap();

    let bytes = fs::read(&path).unwrap();
    let short = path_in(&dir, "short.slob");
    fs::write(&short, &bytes[..bytes.len() - 10]).unwrap();
    assert!(matches!(
        Slob::open(&[&short]),
        Err(SlobError::IncorrectFileSize { .. })
    ));
}

#[test]
fn tag_edit_in_place() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "tags.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    writer.tag("label", "initial");
    writer.tag("license.name", "CC BY-SA");
    writer.add(b"body", &[Key::from("k")], "").unwrap();
    writer.finalize().unwrap();

    let size_before = fs::metadata(&path).unwrap().len();
    let license_before = {
        let slob = Slob::open(&[&path]).unwrap();
        assert_eq!(slob.tag("label"), Some("initial"));
        slob.tag("license.name").unwrap().to_string()
    };

    set_tag_value(&path, "label", "updated").unwrap();

    let slob = Slob::open(&[&path]).unwrap();
    // Padded values read back at their exact logical length.
    assert_eq!(slob.tag("label"), Some("updated"));
    assert_eq!(slob.tag("license.name"), Some(license_before.as_str()));
    assert_eq!(fs::metadata(&path).unwrap().len(), size_before);

    assert!(matches!(
        set_tag_value(&path, "no-such-tag", "x"),
        Err(SlobError::TagNotFound(_))
    ));
}

#[test]
fn oversize_inputs_are_dropped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let path = path_in(&dir, "oversize.slob");

    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&events);
    writer.set_observer(Box::new(move |event: &slob::WriterEvent<'_>| {
        sink.lock().unwrap().push(event.name().to_string());
    }));

    let long_key = "k".repeat(70_000);
    writer
        .add(b"kept", &[Key::from(long_key.as_str()), Key::from("ok")], "")
        .unwrap();
    // All keys oversize: the blob is not stored at all.
    writer
        .add(b"dropped", &[Key::from(long_key.as_str())], "")
        .unwrap();
    writer.finalize().unwrap();

    let slob = Slob::open(&[&path]).unwrap();
    assert_eq!(slob.len(), 1);
    assert_eq!(slob.blob_count(), 1);
    assert_eq!(slob.blob_at(0).unwrap().key(), "ok");

    let events = events.lock().unwrap();
    assert_eq!(
        events.iter().filter(|n| n.as_str() == "key_too_long").count(),
        2
    );
    assert!(events.iter().any(|n| n == "begin_finalize"));
    assert!(events.iter().any(|n| n == "end_finalize"));
}
