//! Runtime dependency provisioning for plugin hosts
//!
//! Extensions loaded into a long-lived host process declare external
//! library coordinates instead of bundling the libraries themselves. At
//! startup, depstrap resolves those coordinates against a remote
//! repository, downloads the artifacts into a shared on-disk cache,
//! optionally relocates their internal namespaces so co-resident plugins
//! cannot collide, and injects the result into the plugin's code search
//! path:
//!
//! - Coordinate resolution (`group:artifact:version` → download URL)
//! - Artifact cache (lookup / reserve / commit, rename-atomic promotion)
//! - Fetching (single-attempt streaming HTTP)
//! - Relocation (archive rewrite with class-reference fixup)
//! - Injection (idempotent search-path attachment)
//! - Bootstrap lists (ordered dependency bundles, e.g. the Kotlin runtime)

pub mod bootstrap;
pub mod cache;
pub mod coordinate;
pub mod fetch;
pub mod inject;
pub mod loader;
pub mod relocate;

pub use bootstrap::{run_bootstrap, BootstrapError, BootstrapList, BootstrapSummary};
pub use cache::{cache_key, ArtifactCache, ArtifactMetadata, CacheError, CachedArtifact, StagingHandle};
pub use coordinate::{Coordinate, CoordinateError, DownloadDescriptor, Repository};
pub use fetch::{ArtifactFetch, FetchError, HttpFetcher};
pub use inject::{InjectError, InjectionRegistry, SearchPath};
pub use loader::{DependencyLoader, LoadError, LoadOutcome};
pub use relocate::{relocate_archive, RelocateError, RelocationMap};
