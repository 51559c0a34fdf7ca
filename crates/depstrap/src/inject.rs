//! Artifact injection into extension code-loading contexts
//!
//! The host runtime supplies the actual mechanism as a narrow capability
//! trait ([`SearchPath`]); this module only guarantees idempotency: every
//! (context, artifact) pair is appended at most once per process, tracked in
//! an explicit registry object rather than ambient global state.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during injection
#[derive(Debug, Error)]
pub enum InjectError {
    /// The target extension context has already been torn down
    #[error("extension context '{context}' is closed")]
    ContextClosed { context: String },

    /// The artifact cannot be attached to this context's loading mechanism
    #[error("incompatible artifact {path:?}: {reason}")]
    IncompatibleArtifact { path: PathBuf, reason: String },

    /// IO error reading the artifact
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host-supplied capability: one extension's code search path
///
/// Implementations wrap whatever classloader or module mechanism the host
/// uses; the pipeline never sees that mechanism directly.
pub trait SearchPath: Send + Sync {
    /// Stable identity for this context, used to key idempotency tracking
    fn id(&self) -> &str;

    /// Whether the context is still live and can accept new entries
    fn is_open(&self) -> bool;

    /// Append an artifact to the context's search path
    fn append(&self, artifact: &Path) -> Result<(), InjectError>;
}

/// Process-wide record of which artifacts reached which contexts
///
/// Constructed explicitly and passed to the loader, so tests can run with
/// independent registries instead of sharing a singleton.
#[derive(Debug, Default)]
pub struct InjectionRegistry {
    injected: Mutex<HashSet<(String, PathBuf)>>,
}

impl InjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `artifact` resolvable from `context`, idempotently
    ///
    /// A repeat call for a pair that already succeeded is a no-op success.
    /// The registry lock is held across the append so two racing callers
    /// cannot double-register the same pair.
    pub fn inject(&self, context: &dyn SearchPath, artifact: &Path) -> Result<(), InjectError> {
        if !context.is_open() {
            return Err(InjectError::ContextClosed {
                context: context.id().to_string(),
            });
        }

        // Canonicalize so the same cache entry reached through different
        // relative paths still de-duplicates.
        let canonical = artifact.canonicalize()?;
        let entry = (context.id().to_string(), canonical.clone());

        let mut injected = self.injected.lock();
        if injected.contains(&entry) {
            debug!(context = context.id(), artifact = %canonical.display(), "already injected");
            return Ok(());
        }

        verify_jar(&canonical)?;
        context.append(&canonical)?;
        injected.insert(entry);
        debug!(context = context.id(), artifact = %canonical.display(), "injected artifact");
        Ok(())
    }

    /// Whether a pair has already been injected
    pub fn is_injected(&self, context_id: &str, artifact: &Path) -> bool {
        let Ok(canonical) = artifact.canonicalize() else {
            return false;
        };
        self.injected
            .lock()
            .contains(&(context_id.to_string(), canonical))
    }
}

fn verify_jar(path: &Path) -> Result<(), InjectError> {
    let mut header = [0u8; 2];
    let mut file = File::open(path)?;
    let readable = matches!(file.read_exact(&mut header), Ok(()) if &header == b"PK");
    if !readable {
        return Err(InjectError::IncompatibleArtifact {
            path: path.to_path_buf(),
            reason: "not a jar archive".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubContext {
        id: String,
        open: AtomicBool,
        appended: Mutex<Vec<PathBuf>>,
    }

    impl StubContext {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                open: AtomicBool::new(true),
                appended: Mutex::new(Vec::new()),
            }
        }
    }

    impl SearchPath for StubContext {
        fn id(&self) -> &str {
            &self.id
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn append(&self, artifact: &Path) -> Result<(), InjectError> {
            self.appended.lock().push(artifact.to_path_buf());
            Ok(())
        }
    }

    fn fake_jar(dir: &Path) -> PathBuf {
        let path = dir.join("lib.jar");
        std::fs::write(&path, b"PK\x03\x04fake").unwrap();
        path
    }

    #[test]
    fn test_repeat_injection_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let jar = fake_jar(dir.path());
        let registry = InjectionRegistry::new();
        let context = StubContext::new("ext-a");

        registry.inject(&context, &jar).unwrap();
        registry.inject(&context, &jar).unwrap();

        assert_eq!(context.appended.lock().len(), 1);
        assert!(registry.is_injected("ext-a", &jar));
    }

    #[test]
    fn test_distinct_contexts_tracked_separately() {
        let dir = tempfile::tempdir().unwrap();
        let jar = fake_jar(dir.path());
        let registry = InjectionRegistry::new();
        let a = StubContext::new("ext-a");
        let b = StubContext::new("ext-b");

        registry.inject(&a, &jar).unwrap();
        assert!(registry.is_injected("ext-a", &jar));
        assert!(!registry.is_injected("ext-b", &jar));

        registry.inject(&b, &jar).unwrap();
        assert_eq!(b.appended.lock().len(), 1);
    }

    #[test]
    fn test_closed_context_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let jar = fake_jar(dir.path());
        let registry = InjectionRegistry::new();
        let context = StubContext::new("ext-a");
        context.open.store(false, Ordering::SeqCst);

        let result = registry.inject(&context, &jar);
        assert!(matches!(result, Err(InjectError::ContextClosed { .. })));
        assert!(context.appended.lock().is_empty());
    }

    #[test]
    fn test_incompatible_artifact_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-jar.txt");
        std::fs::write(&path, b"just text").unwrap();
        let registry = InjectionRegistry::new();
        let context = StubContext::new("ext-a");

        let result = registry.inject(&context, &path);
        assert!(matches!(result, Err(InjectError::IncompatibleArtifact { .. })));
        assert!(!registry.is_injected("ext-a", &path));
    }
}
