//! Library coordinates and download-URL resolution
//!
//! A [`Coordinate`] names one upstream library release as a
//! group/artifact/version triple. Combined with a [`Repository`] it resolves
//! to a [`DownloadDescriptor`] via the standard Maven-style URL template:
//! `{base}/{group-with-slashes}/{artifact}/{version}/{artifact}-{version}.jar`.
//!
//! Resolution is pure; all validation happens when a coordinate or
//! repository is constructed, so later cache-path construction can never be
//! steered outside the cache root.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors that can occur when constructing coordinates or repositories
#[derive(Debug, Error)]
pub enum CoordinateError {
    /// A coordinate field was empty
    #[error("coordinate field '{field}' is empty")]
    EmptyField { field: &'static str },

    /// A coordinate field contained a character that could escape the cache
    #[error("coordinate field '{field}' contains an illegal character: {value}")]
    IllegalCharacter { field: &'static str, value: String },

    /// The string form did not have exactly three colon-separated parts
    #[error("malformed coordinate '{0}': expected group:artifact:version")]
    Malformed(String),

    /// The repository base URL did not parse
    #[error("invalid repository URL '{url}': {reason}")]
    InvalidRepository { url: String, reason: String },

    /// The repository URL used a scheme other than http/https
    #[error("unsupported repository scheme '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },
}

/// A group/artifact/version triple identifying an upstream library release
///
/// Immutable once constructed. Serializes to and from the colon-delimited
/// string form `group:artifact:version`. A `!` anywhere in the string form
/// marks the coordinate as exempt from relocation (the marker is stripped
/// before parsing).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    group: String,
    artifact: String,
    version: String,
    no_relocate: bool,
}

impl Coordinate {
    /// Create a validated coordinate
    ///
    /// Fails if any field is empty or contains a path separator, a colon, or
    /// a `..` sequence.
    pub fn new(group: &str, artifact: &str, version: &str) -> Result<Self, CoordinateError> {
        validate_field("group", group)?;
        validate_field("artifact", artifact)?;
        validate_field("version", version)?;

        Ok(Self {
            group: group.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
            no_relocate: false,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether this coordinate carried the `!` no-relocation marker
    pub fn no_relocate(&self) -> bool {
        self.no_relocate
    }

    /// The group with dots replaced by slashes, as it appears in repository paths
    pub fn group_path(&self) -> String {
        self.group.replace('.', "/")
    }

    /// The expected artifact file name, `{artifact}-{version}.jar`
    pub fn file_name(&self) -> String {
        format!("{}-{}.jar", self.artifact, self.version)
    }

    /// Resolve this coordinate against a repository
    ///
    /// Pure URL construction; no I/O is performed.
    pub fn resolve(&self, repository: &Repository) -> DownloadDescriptor {
        let url = format!(
            "{}/{}/{}/{}/{}",
            repository.base_url(),
            self.group_path(),
            self.artifact,
            self.version,
            self.file_name(),
        );

        DownloadDescriptor {
            url,
            file_name: self.file_name(),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let no_relocate = s.contains('!');
        let cleaned = s.replace('!', "");

        let mut parts = cleaned.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(group), Some(artifact), Some(version), None) => {
                let mut coordinate = Coordinate::new(group, artifact, version)?;
                coordinate.no_relocate = no_relocate;
                Ok(coordinate)
            }
            _ => Err(CoordinateError::Malformed(s.to_string())),
        }
    }
}

fn validate_field(field: &'static str, value: &str) -> Result<(), CoordinateError> {
    if value.is_empty() {
        return Err(CoordinateError::EmptyField { field });
    }

    if value.contains(['/', '\\', ':']) || value.contains("..") {
        return Err(CoordinateError::IllegalCharacter {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

/// A remote artifact repository, identified by its base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    base_url: String,
}

impl Repository {
    /// Create a repository from a base URL
    ///
    /// The URL must parse and use http or https. A trailing slash is
    /// trimmed so resolution can join path segments uniformly.
    pub fn new(base_url: &str) -> Result<Self, CoordinateError> {
        let parsed = Url::parse(base_url).map_err(|e| CoordinateError::InvalidRepository {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(CoordinateError::UnsupportedScheme {
                    url: base_url.to_string(),
                    scheme: scheme.to_string(),
                })
            }
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Maven Central, the conventional default repository
    pub fn maven_central() -> Self {
        Self {
            base_url: "https://repo.maven.apache.org/maven2".to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// A resolved download target: concrete URL plus expected file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    /// Full download URL
    pub url: String,
    /// Expected artifact file name, `{artifact}-{version}.jar`
    pub file_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_coordinate() {
        let coordinate: Coordinate = "org.jetbrains.kotlin:kotlin-stdlib:1.9.0".parse().unwrap();
        assert_eq!(coordinate.group(), "org.jetbrains.kotlin");
        assert_eq!(coordinate.artifact(), "kotlin-stdlib");
        assert_eq!(coordinate.version(), "1.9.0");
        assert!(!coordinate.no_relocate());
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        assert!(matches!(
            "group:artifact".parse::<Coordinate>(),
            Err(CoordinateError::Malformed(_))
        ));
        assert!(matches!(
            "a:b:c:d".parse::<Coordinate>(),
            Err(CoordinateError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_field_rejected() {
        assert!(matches!(
            Coordinate::new("", "lib", "1.0"),
            Err(CoordinateError::EmptyField { field: "group" })
        ));
    }

    #[test]
    fn test_path_separator_rejected() {
        assert!(Coordinate::new("org/evil", "lib", "1.0").is_err());
        assert!(Coordinate::new("org.a", "lib", "../1.0").is_err());
        assert!(Coordinate::new("org.a", "li\\b", "1.0").is_err());
    }

    #[test]
    fn test_no_relocate_marker() {
        let coordinate: Coordinate = "!org.a:lib:1.0".parse().unwrap();
        assert!(coordinate.no_relocate());
        assert_eq!(coordinate.to_string(), "org.a:lib:1.0");
    }

    #[test]
    fn test_display_round_trip() {
        let coordinate = Coordinate::new("org.a", "lib", "2.1.4").unwrap();
        let reparsed: Coordinate = coordinate.to_string().parse().unwrap();
        assert_eq!(coordinate, reparsed);
    }

    #[test]
    fn test_resolve_url() {
        let coordinate = Coordinate::new("group", "lib", "1.0").unwrap();
        let repository = Repository::new("https://repo.example/").unwrap();
        let descriptor = coordinate.resolve(&repository);

        assert_eq!(descriptor.url, "https://repo.example/group/lib/1.0/lib-1.0.jar");
        assert_eq!(descriptor.file_name, "lib-1.0.jar");
    }

    #[test]
    fn test_resolve_dotted_group() {
        let coordinate = Coordinate::new("org.jetbrains.kotlin", "kotlin-stdlib", "1.9.0").unwrap();
        let repository = Repository::maven_central();
        let descriptor = coordinate.resolve(&repository);

        assert_eq!(
            descriptor.url,
            "https://repo.maven.apache.org/maven2/org/jetbrains/kotlin/kotlin-stdlib/1.9.0/kotlin-stdlib-1.9.0.jar"
        );
    }

    #[test]
    fn test_repository_rejects_bad_scheme() {
        assert!(matches!(
            Repository::new("ftp://repo.example/"),
            Err(CoordinateError::UnsupportedScheme { .. })
        ));
        assert!(Repository::new("not a url").is_err());
    }
}
