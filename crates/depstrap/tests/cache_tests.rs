//! Integration tests for the artifact cache
//!
//! Exercises the reserve/commit discipline: atomic promotion, self-healing
//! lookups, cleanup of abandoned staging files, and per-key serialization
//! of concurrent writers.

use depstrap::{cache_key, ArtifactCache, ArtifactMetadata, Coordinate, RelocationMap};
use std::fs;
use std::thread;
use std::time::Duration;

fn coordinate() -> Coordinate {
    Coordinate::new("org.a", "lib", "1.0").unwrap()
}

const ORIGIN: &str = "https://repo.example/org/a/lib/1.0/lib-1.0.jar";
const PAYLOAD: &[u8] = b"PK\x03\x04pretend-jar-bytes";

#[test]
fn test_reserve_commit_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::with_root(dir.path()).unwrap();
    let key = cache_key(&coordinate(), &RelocationMap::default());

    assert!(cache.lookup(&key).is_none());

    let handle = cache.reserve(&key).unwrap();
    fs::write(handle.staging_path(), PAYLOAD).unwrap();
    let committed = cache.commit(handle, &coordinate(), ORIGIN).unwrap();

    let found = cache.lookup(&key).expect("committed entry should be a hit");
    assert_eq!(found, committed);
    assert_eq!(fs::read(&found.file_path).unwrap(), PAYLOAD);
    assert_eq!(found.size_bytes, PAYLOAD.len() as u64);
}

#[test]
fn test_metadata_sidecar_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::with_root(dir.path()).unwrap();
    let key = cache_key(&coordinate(), &RelocationMap::default());

    let handle = cache.reserve(&key).unwrap();
    fs::write(handle.staging_path(), PAYLOAD).unwrap();
    cache.commit(handle, &coordinate(), ORIGIN).unwrap();

    let metadata = ArtifactMetadata::load(&cache.metadata_path(&key)).unwrap();
    assert_eq!(metadata.coordinate, "org.a:lib:1.0");
    assert_eq!(metadata.origin_url, ORIGIN);
    assert_eq!(metadata.size_bytes, PAYLOAD.len() as u64);
    assert_eq!(metadata.checksum.len(), 64);
}

#[test]
fn test_abandoned_staging_never_visible() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::with_root(dir.path()).unwrap();
    let key = cache_key(&coordinate(), &RelocationMap::default());

    // Simulate a crash between the staging write and the commit.
    let staging = {
        let handle = cache.reserve(&key).unwrap();
        fs::write(handle.staging_path(), PAYLOAD).unwrap();
        handle.staging_path().to_path_buf()
    };

    assert!(cache.lookup(&key).is_none());
    assert!(!cache.artifact_path(&key).exists());
    assert!(staging.exists());

    // The next reservation for the key sweeps the leftovers.
    let handle = cache.reserve(&key).unwrap();
    assert!(!staging.exists());
    drop(handle);
}

#[test]
fn test_zero_byte_entry_self_heals() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::with_root(dir.path()).unwrap();
    let key = cache_key(&coordinate(), &RelocationMap::default());

    fs::create_dir_all(dir.path().join(&key)).unwrap();
    fs::write(cache.artifact_path(&key), b"").unwrap();
    assert!(cache.lookup(&key).is_none());

    // A fresh commit renames straight over the corrupt file.
    let handle = cache.reserve(&key).unwrap();
    fs::write(handle.staging_path(), PAYLOAD).unwrap();
    cache.commit(handle, &coordinate(), ORIGIN).unwrap();

    assert!(cache.lookup(&key).is_some());
    assert_eq!(fs::read(cache.artifact_path(&key)).unwrap(), PAYLOAD);
}

#[test]
fn test_distinct_relocations_get_distinct_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::with_root(dir.path()).unwrap();

    let one = cache_key(
        &coordinate(),
        &RelocationMap::from_pairs([("org.a", "one.org.a")]).unwrap(),
    );
    let two = cache_key(
        &coordinate(),
        &RelocationMap::from_pairs([("org.a", "two.org.a")]).unwrap(),
    );
    assert_ne!(one, two);

    for (key, payload) in [(&one, b"PK-one".as_slice()), (&two, b"PK-two".as_slice())] {
        let handle = cache.reserve(key).unwrap();
        fs::write(handle.staging_path(), payload).unwrap();
        cache.commit(handle, &coordinate(), ORIGIN).unwrap();
    }

    assert_eq!(fs::read(cache.artifact_path(&one)).unwrap(), b"PK-one");
    assert_eq!(fs::read(cache.artifact_path(&two)).unwrap(), b"PK-two");
}

#[test]
fn test_reserve_serializes_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::with_root(dir.path()).unwrap();
    let key = cache_key(&coordinate(), &RelocationMap::default());

    let handle = cache.reserve(&key).unwrap();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            // Blocks until the first handle is released by the commit.
            let handle = cache.reserve(&key).unwrap();
            let hit = cache.lookup(&key);
            drop(handle);
            hit
        });

        thread::sleep(Duration::from_millis(100));
        fs::write(handle.staging_path(), PAYLOAD).unwrap();
        cache.commit(handle, &coordinate(), ORIGIN).unwrap();

        let observed = waiter.join().unwrap();
        assert!(observed.is_some(), "waiter should observe the committed entry");
    });
}
