//! Bootstrap lists
//!
//! A bootstrap list is a named, ordered set of coordinates provisioned as
//! one logical unit. [`run_bootstrap`] walks the list in declaration order
//! and fails fast: the first coordinate that cannot be provisioned aborts
//! the rest, so an extension never ends up with half its runtime injected.
//! This is also the retry boundary — transient network failures are retried
//! with bounded exponential backoff before the bootstrap gives up.

use crate::coordinate::{Coordinate, CoordinateError, Repository};
use crate::fetch::FetchError;
use crate::inject::SearchPath;
use crate::loader::{DependencyLoader, LoadError, LoadOutcome};
use crate::relocate::RelocationMap;
use backoff::ExponentialBackoff;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// A failed bootstrap, naming the coordinate that broke it
#[derive(Debug, Error)]
#[error("bootstrap aborted at {coordinate}: {source}")]
pub struct BootstrapError {
    /// The coordinate that failed; later list entries were not attempted
    pub coordinate: Coordinate,
    /// The underlying failure
    #[source]
    pub source: LoadError,
}

/// A named, ordered set of coordinates provisioned together
#[derive(Debug, Clone)]
pub struct BootstrapList {
    name: String,
    coordinates: Vec<Coordinate>,
}

impl BootstrapList {
    pub fn new(name: impl Into<String>, coordinates: Vec<Coordinate>) -> Self {
        Self {
            name: name.into(),
            coordinates,
        }
    }

    /// The Kotlin runtime bundle: stdlib variants and reflection at the
    /// caller's Kotlin version, plus the coroutines core at its own pinned
    /// release
    pub fn kotlin_runtime(version: &str) -> Result<Self, CoordinateError> {
        const COROUTINES_VERSION: &str = "1.7.3";

        let coordinates = vec![
            Coordinate::new("org.jetbrains.kotlin", "kotlin-stdlib", version)?,
            Coordinate::new("org.jetbrains.kotlin", "kotlin-stdlib-jdk8", version)?,
            Coordinate::new("org.jetbrains.kotlin", "kotlin-stdlib-jdk7", version)?,
            Coordinate::new("org.jetbrains.kotlin", "kotlin-reflect", version)?,
            Coordinate::new(
                "org.jetbrains.kotlinx",
                "kotlinx-coroutines-core",
                COROUTINES_VERSION,
            )?,
        ];

        Ok(Self::new("kotlin-runtime", coordinates))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }
}

/// Counts from a completed bootstrap
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSummary {
    /// Coordinates provisioned (all of them, on success)
    pub loaded: usize,
    /// How many of those were served from cache without a fetch
    pub from_cache: usize,
}

/// Provision every coordinate in `list` into `context`, in order
///
/// Fail-fast: the first failing coordinate aborts the remainder and the
/// returned [`BootstrapError`] names it. Transient network errors are
/// retried with exponential backoff before counting as a failure; all
/// other errors are permanent.
pub fn run_bootstrap(
    loader: &DependencyLoader,
    list: &BootstrapList,
    context: &dyn SearchPath,
    relocation: &RelocationMap,
    repository: &Repository,
) -> Result<BootstrapSummary, BootstrapError> {
    info!(
        list = list.name(),
        coordinates = list.coordinates().len(),
        "running bootstrap"
    );

    let mut summary = BootstrapSummary::default();
    for coordinate in list.coordinates() {
        let outcome = load_with_retry(loader, context, coordinate, relocation, repository)
            .map_err(|source| BootstrapError {
                coordinate: coordinate.clone(),
                source,
            })?;

        summary.loaded += 1;
        if outcome.from_cache {
            summary.from_cache += 1;
        }
    }

    info!(
        list = list.name(),
        loaded = summary.loaded,
        from_cache = summary.from_cache,
        "bootstrap complete"
    );
    Ok(summary)
}

fn load_with_retry(
    loader: &DependencyLoader,
    context: &dyn SearchPath,
    coordinate: &Coordinate,
    relocation: &RelocationMap,
    repository: &Repository,
) -> Result<LoadOutcome, LoadError> {
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_elapsed_time: Some(Duration::from_secs(20)),
        ..ExponentialBackoff::default()
    };

    backoff::retry(policy, || {
        loader
            .load(context, coordinate, relocation, repository)
            .map_err(|err| match err {
                LoadError::Fetch(FetchError::Network { .. }) => {
                    warn!(%coordinate, error = %err, "transient fetch failure, will retry");
                    backoff::Error::transient(err)
                }
                err => backoff::Error::permanent(err),
            })
    })
    .map_err(|err| match err {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kotlin_runtime_contents_and_order() {
        let list = BootstrapList::kotlin_runtime("1.9.22").unwrap();
        assert_eq!(list.name(), "kotlin-runtime");

        let rendered: Vec<String> = list
            .coordinates()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "org.jetbrains.kotlin:kotlin-stdlib:1.9.22",
                "org.jetbrains.kotlin:kotlin-stdlib-jdk8:1.9.22",
                "org.jetbrains.kotlin:kotlin-stdlib-jdk7:1.9.22",
                "org.jetbrains.kotlin:kotlin-reflect:1.9.22",
                "org.jetbrains.kotlinx:kotlinx-coroutines-core:1.7.3",
            ]
        );
    }

    #[test]
    fn test_kotlin_runtime_rejects_bad_version() {
        assert!(BootstrapList::kotlin_runtime("").is_err());
        assert!(BootstrapList::kotlin_runtime("1.9/evil").is_err());
    }
}
