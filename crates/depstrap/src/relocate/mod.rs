//! Artifact relocation
//!
//! Rewrites a jar's internal namespaces to a private prefix so that two
//! plugins bundling the same library can coexist in one process. The rewrite
//! preserves archive structure: entry order and per-entry compression
//! settings carry over, entries outside the mapped namespaces stay
//! byte-identical, and the raw input artifact is never modified in place.

mod classfile;

pub(crate) use classfile::rewrite_class;

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use zip::read::ZipArchive;
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

/// Errors that can occur during relocation
#[derive(Debug, Error)]
pub enum RelocateError {
    /// Input could not be parsed as a jar/zip archive, or an entry inside
    /// it could not be parsed as the format its name declares
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// Two declared prefixes normalize to the same source with different
    /// targets; relocation would be non-deterministic, so it is rejected
    #[error("ambiguous relocation for prefix '{prefix}': '{first}' vs '{second}'")]
    AmbiguousMapping {
        prefix: String,
        first: String,
        second: String,
    },

    /// A relocation prefix was empty or not a valid namespace prefix
    #[error("invalid relocation prefix: '{0}'")]
    InvalidPrefix(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An ordered mapping from source namespace prefixes to destination prefixes
///
/// Prefixes may be given in dot (`org.a`) or slash (`org/a`) form; both
/// normalize to slash form. Matching is longest-prefix-wins on whole path
/// segments, and the precedence order (longest first, then lexicographic) is
/// independent of insertion order, so the map hashes stably.
#[derive(Debug, Clone, Default)]
pub struct RelocationMap {
    /// Sorted by precedence: longest source first, ties lexicographic
    entries: Vec<RelocationEntry>,
}

#[derive(Debug, Clone)]
struct RelocationEntry {
    source: String,
    target: String,
}

impl RelocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from (source, target) prefix pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, RelocateError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut map = Self::new();
        for (source, target) in pairs {
            map.insert(source, target)?;
        }
        Ok(map)
    }

    /// Add one prefix mapping
    ///
    /// Inserting the same source twice with the same target is a no-op;
    /// with a different target it fails with [`RelocateError::AmbiguousMapping`]
    /// rather than letting match order decide.
    pub fn insert(&mut self, source: &str, target: &str) -> Result<(), RelocateError> {
        let source = normalize_prefix(source)?;
        let target = normalize_prefix(target)?;

        if let Some(existing) = self.entries.iter().find(|e| e.source == source) {
            if existing.target == target {
                return Ok(());
            }
            return Err(RelocateError::AmbiguousMapping {
                prefix: source,
                first: existing.target.clone(),
                second: target,
            });
        }

        self.entries.push(RelocationEntry { source, target });
        self.entries.sort_by(|a, b| {
            b.source
                .len()
                .cmp(&a.source.len())
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Relocate an internal name or entry path (slash form), or `None` if no
    /// prefix matches
    pub fn relocate_class_name(&self, name: &str) -> Option<String> {
        let entry = self.matched(name)?;
        Some(format!("{}{}", entry.target, &name[entry.source.len()..]))
    }

    /// Relocate an archive entry name, preserving a trailing slash on
    /// directory entries
    pub fn rename_entry(&self, entry_name: &str) -> Option<String> {
        match entry_name.strip_suffix('/') {
            Some(path) => Some(format!("{}/", self.relocate_class_name(path)?)),
            None => self.relocate_class_name(entry_name),
        }
    }

    /// Stable hash of the map in precedence order, for cache keying
    ///
    /// Insertion order does not influence the digest; precedence order does.
    pub fn precedence_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.source.as_bytes());
            hasher.update(b"=>");
            hasher.update(entry.target.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Longest entry whose source is a whole-segment prefix of `path`
    fn matched(&self, path: &str) -> Option<&RelocationEntry> {
        self.entries.iter().find(|entry| {
            path == entry.source
                || path
                    .strip_prefix(entry.source.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

fn normalize_prefix(prefix: &str) -> Result<String, RelocateError> {
    let normalized = prefix.replace('.', "/");
    let normalized = normalized.trim_end_matches('/');
    if normalized.is_empty() || normalized.starts_with('/') || normalized.contains("//") {
        return Err(RelocateError::InvalidPrefix(prefix.to_string()));
    }
    Ok(normalized.to_string())
}

/// Rewrite `raw` into a relocated archive at `destination`
///
/// Entry order is preserved; entries are renamed per the map, class files
/// get their constant pool references rewritten, and everything else is
/// copied through with its original compression. The raw artifact is only
/// read, so a failed relocation leaves it intact for inspection or retry.
pub fn relocate_archive(
    raw: &Path,
    map: &RelocationMap,
    destination: &Path,
) -> Result<(), RelocateError> {
    let input = File::open(raw)?;
    let mut archive = ZipArchive::new(input).map_err(zip_err)?;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let output = File::create(destination)?;
    let mut writer = ZipWriter::new(output);

    let mut renamed = 0usize;
    let mut rewritten = 0usize;

    for index in 0..archive.len() {
        let is_class = {
            let entry = archive.by_index_raw(index).map_err(zip_err)?;
            !entry.is_dir() && entry.name().ends_with(".class")
        };

        if is_class {
            let mut entry = archive.by_index(index).map_err(zip_err)?;
            let name = entry.name().to_owned();
            let compression = entry.compression();
            let unix_mode = entry.unix_mode();

            let mut content = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut content)?;
            drop(entry);

            let new_name = map.rename_entry(&name);
            let new_content = rewrite_class(&content, map)
                .map_err(|e| RelocateError::MalformedArchive(format!("{name}: {e}")))?;
            if new_name.is_some() {
                renamed += 1;
            }
            if new_content.is_some() {
                rewritten += 1;
            }

            // Compression features beyond stored/deflate are not compiled
            // in; jars use deflate, so recompress with that.
            let method = match compression {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            let mut options = SimpleFileOptions::default().compression_method(method);
            if let Some(mode) = unix_mode {
                options = options.unix_permissions(mode);
            }

            writer
                .start_file(new_name.as_deref().unwrap_or(&name), options)
                .map_err(zip_err)?;
            writer.write_all(new_content.as_deref().unwrap_or(&content))?;
        } else {
            let entry = archive.by_index_raw(index).map_err(zip_err)?;
            match map.rename_entry(entry.name()) {
                Some(new_name) => {
                    renamed += 1;
                    writer.raw_copy_file_rename(entry, new_name).map_err(zip_err)?;
                }
                None => writer.raw_copy_file(entry).map_err(zip_err)?,
            }
        }
    }

    writer.finish().map_err(zip_err)?;
    debug!(
        raw = %raw.display(),
        renamed,
        rewritten,
        "relocated archive"
    );
    Ok(())
}

fn zip_err(err: ZipError) -> RelocateError {
    RelocateError::MalformedArchive(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_dots_to_slashes() {
        let map = RelocationMap::from_pairs([("org.a", "shaded.org.a")]).unwrap();
        assert_eq!(
            map.relocate_class_name("org/a/Foo"),
            Some("shaded/org/a/Foo".to_string())
        );
    }

    #[test]
    fn test_whole_segment_matching() {
        let map = RelocationMap::from_pairs([("org.a", "shaded.org.a")]).unwrap();
        // "org/ab" shares the byte prefix but not the segment prefix.
        assert_eq!(map.relocate_class_name("org/ab/Foo"), None);
        assert_eq!(map.relocate_class_name("org/a"), Some("shaded/org/a".to_string()));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let map = RelocationMap::from_pairs([
            ("org.a", "one.org.a"),
            ("org.a.deep", "two.org.a.deep"),
        ])
        .unwrap();
        assert_eq!(
            map.relocate_class_name("org/a/deep/Foo"),
            Some("two/org/a/deep/Foo".to_string())
        );
        assert_eq!(
            map.relocate_class_name("org/a/Foo"),
            Some("one/org/a/Foo".to_string())
        );
    }

    #[test]
    fn test_ambiguous_mapping_rejected() {
        let mut map = RelocationMap::new();
        map.insert("org.a", "one.org.a").unwrap();
        // Same prefix in slash form with a different target.
        let result = map.insert("org/a", "two.org.a");
        assert!(matches!(result, Err(RelocateError::AmbiguousMapping { .. })));
        // Re-declaring with the identical target collapses silently.
        map.insert("org/a", "one.org.a").unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let mut map = RelocationMap::new();
        assert!(map.insert("", "x").is_err());
        assert!(map.insert("/org/a", "x").is_err());
    }

    #[test]
    fn test_rename_entry_preserves_directory_slash() {
        let map = RelocationMap::from_pairs([("org.a", "shaded.org.a")]).unwrap();
        assert_eq!(
            map.rename_entry("org/a/"),
            Some("shaded/org/a/".to_string())
        );
        assert_eq!(
            map.rename_entry("org/a/Foo.class"),
            Some("shaded/org/a/Foo.class".to_string())
        );
        assert_eq!(map.rename_entry("org/b/Bar.class"), None);
    }

    #[test]
    fn test_digest_independent_of_insertion_order() {
        let forward =
            RelocationMap::from_pairs([("org.a", "x.org.a"), ("com.b", "x.com.b")]).unwrap();
        let backward =
            RelocationMap::from_pairs([("com.b", "x.com.b"), ("org.a", "x.org.a")]).unwrap();
        assert_eq!(forward.precedence_digest(), backward.precedence_digest());
    }

    #[test]
    fn test_digest_depends_on_targets() {
        let one = RelocationMap::from_pairs([("org.a", "one.org.a")]).unwrap();
        let two = RelocationMap::from_pairs([("org.a", "two.org.a")]).unwrap();
        assert_ne!(one.precedence_digest(), two.precedence_digest());
    }
}
