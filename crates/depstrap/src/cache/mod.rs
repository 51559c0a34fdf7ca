//! On-disk artifact cache
//!
//! Maps a cache key (coordinate plus relocation configuration) to a local
//! artifact file. Writers never touch canonical paths directly: they
//! `reserve` a staging slot, materialize the artifact there, and `commit`
//! promotes it with a rename, so a crash mid-write can never expose a
//! partial file at a canonical path. Reservations are serialized per key so
//! at most one fetch+relocate runs for a given key at a time.
//!
//! Directory layout:
//! ```text
//! <root>/
//! ├── <cache-key>/
//! │   ├── artifact.jar
//! │   └── metadata.json
//! └── tmp/
//! ```

mod metadata;

pub use metadata::{ArtifactMetadata, MetadataError};

use crate::coordinate::Coordinate;
use crate::relocate::RelocationMap;
use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const ARTIFACT_FILE: &str = "artifact.jar";
const METADATA_FILE: &str = "metadata.json";

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache directory creation failed
    #[error("failed to initialize cache directory: {0}")]
    Init(String),

    /// Commit was attempted with no complete staged artifact
    #[error("staged artifact for '{key}' is empty or missing")]
    IncompleteStaging { key: String },

    /// Metadata sidecar could not be written
    #[error("metadata error: {0}")]
    Metadata(String),
}

/// Derive the cache key for a (coordinate, relocation map) pair
///
/// The key embeds the artifact and version for readability plus a digest of
/// the full coordinate string and the map's precedence hash, so the same
/// coordinate cached under two different relocations gets two entries.
pub fn cache_key(coordinate: &Coordinate, relocation: &RelocationMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(coordinate.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(relocation.precedence_digest().as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!(
        "{}-{}-{}",
        coordinate.artifact(),
        coordinate.version(),
        &digest[..16]
    )
}

/// A committed, immutable cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    /// Key the entry was committed under
    pub cache_key: String,
    /// Canonical artifact path
    pub file_path: PathBuf,
    /// Artifact size in bytes
    pub size_bytes: u64,
}

/// Serializes in-flight work per cache key
#[derive(Debug, Default)]
struct KeyLocks {
    busy: Mutex<HashSet<String>>,
    ready: Condvar,
}

impl KeyLocks {
    /// Block until `key` is free, then mark it busy
    fn acquire(&self, key: &str) {
        let mut busy = self.busy.lock();
        while busy.contains(key) {
            self.ready.wait(&mut busy);
        }
        busy.insert(key.to_string());
    }

    fn release(&self, key: &str) {
        let mut busy = self.busy.lock();
        busy.remove(key);
        self.ready.notify_all();
    }
}

/// A reserved staging slot for one cache key
///
/// Holding the handle holds the key's reservation; dropping it (committed
/// or not) releases the reservation so waiting callers can re-check
/// `lookup`. Staging files left behind by an abandoned handle are cleaned
/// up by the next `reserve` for the same key.
#[derive(Debug)]
pub struct StagingHandle {
    key: String,
    staging_path: PathBuf,
    raw_path: PathBuf,
    locks: Arc<KeyLocks>,
}

impl StagingHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Where the finished (relocated, or plain-fetched) artifact must be
    /// written before `commit`
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Scratch location for the raw fetched artifact when a relocation pass
    /// still has to run
    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

/// Filesystem cache for fetched (and relocated) artifacts
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    locks: Arc<KeyLocks>,
}

impl ArtifactCache {
    /// Initialize the cache at the default location, `~/.depstrap/cache/`
    pub fn init() -> Result<Self, CacheError> {
        let home = dirs::home_dir()
            .ok_or_else(|| CacheError::Init("could not determine home directory".to_string()))?;
        Self::with_root(home.join(".depstrap").join("cache"))
    }

    /// Initialize the cache at an explicit root (used by tests and by hosts
    /// that scope the cache to their own data directory)
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("tmp"))?;

        Ok(Self {
            root,
            locks: Arc::new(KeyLocks::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical artifact path for a key
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.root.join(key).join(ARTIFACT_FILE)
    }

    /// Metadata sidecar path for a key
    pub fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(key).join(METADATA_FILE)
    }

    /// Check whether a key is already materialized
    ///
    /// A zero-byte or unreadable file counts as a miss, which self-heals
    /// entries corrupted by an earlier interrupted write: the next writer
    /// commits a fresh artifact over them.
    pub fn lookup(&self, key: &str) -> Option<CachedArtifact> {
        let path = self.artifact_path(key);
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() || meta.len() == 0 {
            warn!(key, "cache entry is empty or unreadable, treating as miss");
            return None;
        }
        File::open(&path).ok()?;

        Some(CachedArtifact {
            cache_key: key.to_string(),
            file_path: path,
            size_bytes: meta.len(),
        })
    }

    /// Reserve the staging slot for a key
    ///
    /// Blocks while another handle for the same key is live; once acquired,
    /// leftover staging files from abandoned work are removed. Callers must
    /// re-check `lookup` after acquiring, since a concurrent holder may
    /// have committed while they waited.
    pub fn reserve(&self, key: &str) -> Result<StagingHandle, CacheError> {
        self.locks.acquire(key);
        let handle = StagingHandle {
            key: key.to_string(),
            staging_path: self.root.join("tmp").join(format!("{key}.stage")),
            raw_path: self.root.join("tmp").join(format!("{key}.raw")),
            locks: Arc::clone(&self.locks),
        };

        fs::create_dir_all(self.root.join("tmp"))?;
        remove_if_present(&handle.staging_path)?;
        remove_if_present(&handle.raw_path)?;
        Ok(handle)
    }

    /// Atomically promote a staged artifact to its canonical path
    ///
    /// The staged file must exist and be non-empty. The metadata sidecar is
    /// written first; the artifact itself lands via rename, so `lookup`
    /// never observes a partially written canonical file.
    pub fn commit(
        &self,
        handle: StagingHandle,
        coordinate: &Coordinate,
        origin_url: &str,
    ) -> Result<CachedArtifact, CacheError> {
        let staged = fs::metadata(handle.staging_path())
            .ok()
            .filter(|m| m.is_file() && m.len() > 0)
            .ok_or_else(|| CacheError::IncompleteStaging {
                key: handle.key().to_string(),
            })?;
        let size_bytes = staged.len();
        let checksum = hex::encode(Sha256::digest(fs::read(handle.staging_path())?));

        let entry_dir = self.root.join(handle.key());
        fs::create_dir_all(&entry_dir)?;

        let metadata = ArtifactMetadata::new(
            coordinate.to_string(),
            origin_url.to_string(),
            checksum,
            size_bytes,
        );
        metadata
            .save(&self.metadata_path(handle.key()))
            .map_err(|e| CacheError::Metadata(e.to_string()))?;

        let canonical = self.artifact_path(handle.key());
        fs::rename(handle.staging_path(), &canonical)?;
        remove_if_present(handle.raw_path())?;

        debug!(key = handle.key(), size_bytes, "committed artifact");
        Ok(CachedArtifact {
            cache_key: handle.key().to_string(),
            file_path: canonical,
            size_bytes,
        })
    }
}

fn remove_if_present(path: &Path) -> Result<(), std::io::Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
