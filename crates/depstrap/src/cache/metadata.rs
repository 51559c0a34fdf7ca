//! Cache entry metadata sidecar
//!
//! Each committed artifact gets a `metadata.json` next to it recording where
//! the bytes came from. The sidecar is diagnostic only: hit/miss decisions
//! are made against the artifact file itself.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during metadata operations
#[derive(Debug, Error)]
pub enum MetadataError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Provenance record for a cached artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Coordinate string form, `group:artifact:version`
    pub coordinate: String,

    /// URL the artifact was fetched from
    pub origin_url: String,

    /// SHA-256 of the committed artifact (hex-encoded)
    pub checksum: String,

    /// Committed artifact size in bytes
    pub size_bytes: u64,

    /// Unix timestamp of the commit
    pub cached_at: u64,
}

impl ArtifactMetadata {
    pub fn new(coordinate: String, origin_url: String, checksum: String, size_bytes: u64) -> Self {
        let cached_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            coordinate,
            origin_url,
            checksum,
            size_bytes,
            cached_at,
        }
    }

    /// Write the sidecar as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a sidecar from disk
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let metadata = ArtifactMetadata::new(
            "org.a:lib:1.0".to_string(),
            "https://repo.example/org/a/lib/1.0/lib-1.0.jar".to_string(),
            "ab".repeat(32),
            1234,
        );
        metadata.save(&path).unwrap();

        let loaded = ArtifactMetadata::load(&path).unwrap();
        assert_eq!(loaded, metadata);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ArtifactMetadata::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(MetadataError::Io(_))));
    }
}
