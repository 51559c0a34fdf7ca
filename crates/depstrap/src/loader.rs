//! Pipeline orchestration for a single coordinate
//!
//! [`DependencyLoader`] owns the cache, the fetcher, and the injection
//! registry, and runs resolve → lookup → (fetch → relocate → commit) →
//! inject for one coordinate. Two loaders with separate caches are fully
//! independent, which is how the tests isolate themselves.

use crate::cache::{cache_key, ArtifactCache, CacheError, CachedArtifact};
use crate::coordinate::{Coordinate, Repository};
use crate::fetch::{ArtifactFetch, FetchError, HttpFetcher};
use crate::inject::{InjectError, InjectionRegistry, SearchPath};
use crate::relocate::{relocate_archive, RelocateError, RelocationMap};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from loading one coordinate
#[derive(Debug, Error)]
pub enum LoadError {
    /// Cache error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Relocation error
    #[error("relocation error: {0}")]
    Relocate(#[from] RelocateError),

    /// Injection error
    #[error("injection error: {0}")]
    Inject(#[from] InjectError),
}

/// Result of loading one coordinate
#[derive(Debug)]
pub struct LoadOutcome {
    /// The committed (or pre-existing) cache entry that was injected
    pub artifact: CachedArtifact,
    /// Whether the artifact was served from cache without a fetch
    pub from_cache: bool,
}

/// Runs the full provisioning pipeline for individual coordinates
pub struct DependencyLoader {
    cache: ArtifactCache,
    fetcher: Box<dyn ArtifactFetch>,
    registry: InjectionRegistry,
}

impl DependencyLoader {
    /// Create a loader over `cache` with the default HTTP fetcher
    pub fn new(cache: ArtifactCache) -> Result<Self, LoadError> {
        Ok(Self::with_fetcher(cache, Box::new(HttpFetcher::new()?)))
    }

    /// Create a loader with a custom fetcher (mirrors, test stubs)
    pub fn with_fetcher(cache: ArtifactCache, fetcher: Box<dyn ArtifactFetch>) -> Self {
        Self {
            cache,
            fetcher,
            registry: InjectionRegistry::new(),
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn registry(&self) -> &InjectionRegistry {
        &self.registry
    }

    /// Load one coordinate into `context`
    ///
    /// Cache-served when possible; otherwise fetches, relocates (unless the
    /// coordinate carries the no-relocation marker or the map is empty),
    /// commits, and injects. Per cache key, at most one fetch+relocate runs
    /// at a time; callers that lose that race observe the committed result.
    pub fn load(
        &self,
        context: &dyn SearchPath,
        coordinate: &Coordinate,
        relocation: &RelocationMap,
        repository: &Repository,
    ) -> Result<LoadOutcome, LoadError> {
        let descriptor = coordinate.resolve(repository);
        let unrelocated = RelocationMap::default();
        let relocation = if coordinate.no_relocate() {
            &unrelocated
        } else {
            relocation
        };
        let key = cache_key(coordinate, relocation);

        if let Some(artifact) = self.cache.lookup(&key) {
            debug!(%coordinate, key = %key, "cache hit");
            self.registry.inject(context, &artifact.file_path)?;
            return Ok(LoadOutcome {
                artifact,
                from_cache: true,
            });
        }

        let handle = self.cache.reserve(&key)?;
        // Another caller may have committed while we waited on the
        // reservation.
        if let Some(artifact) = self.cache.lookup(&key) {
            drop(handle);
            debug!(%coordinate, key = %key, "cache hit after reservation");
            self.registry.inject(context, &artifact.file_path)?;
            return Ok(LoadOutcome {
                artifact,
                from_cache: true,
            });
        }

        info!(%coordinate, url = %descriptor.url, "fetching dependency");
        let artifact = if relocation.is_empty() {
            self.fetcher.fetch(&descriptor, handle.staging_path())?;
            self.cache.commit(handle, coordinate, &descriptor.url)?
        } else {
            self.fetcher.fetch(&descriptor, handle.raw_path())?;
            relocate_archive(handle.raw_path(), relocation, handle.staging_path())?;
            self.cache.commit(handle, coordinate, &descriptor.url)?
        };

        self.registry.inject(context, &artifact.file_path)?;
        Ok(LoadOutcome {
            artifact,
            from_cache: false,
        })
    }
}
