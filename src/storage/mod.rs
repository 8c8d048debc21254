//! Object storage and metric sinks.
//!
//! - [`traits`] - [`ObjectIO`], [`MetricIO`] and the shared [`CloudIOError`]
//! - [`local`] - filesystem-backed implementations used by real runs
//! - [`fake`] - in-memory implementations for tests
//!
//! Locations are written as URIs (`s3://bucket/some/prefix/`) and parsed with
//! [`ObjectLocation::parse`]. The scheme only names the provider; which
//! [`ObjectIO`] serves it is decided by whoever wires the job together.

pub mod fake;
pub mod local;
pub mod traits;

pub use fake::{FakeMetricIO, FakeObjectIO};
pub use local::{LocalMetricIO, LocalObjectIO};
pub use traits::{
    CloudIOError, CloudResult, ErrorKind, MetricIO, MetricPoint, ObjectIO, ObjectMetadata,
};

use std::fmt;

/// A bucket plus key prefix parsed from `scheme://bucket/prefix`.
///
/// A non-empty prefix always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub scheme: String,
    pub bucket: String,
    pub prefix: String,
}

impl ObjectLocation {
    /// Parse a location URI.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidInput` error if the URI has no `://` separator or no bucket.
    pub fn parse(uri: &str) -> CloudResult<Self> {
        let parts: Vec<&str> = uri.splitn(2, "://").collect();
        if parts.len() != 2 || parts[0].is_empty() {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("Invalid location URI format: {uri}"),
            ));
        }
        let rest = parts[1].trim_start_matches('/');
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("Location URI has no bucket: {uri}"),
            ));
        }
        let prefix = prefix.trim_matches('/');
        Ok(Self {
            scheme: parts[0].to_ascii_lowercase(),
            bucket: bucket.to_string(),
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("{prefix}/")
            },
        })
    }

    /// Key of `relative` under this location's prefix.
    #[must_use]
    pub fn key(&self, relative: &str) -> String {
        format!("{}{}", self.prefix, relative.trim_start_matches('/'))
    }

    /// Location one level below this one.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        Self {
            scheme: self.scheme.clone(),
            bucket: self.bucket.clone(),
            prefix: self.key(&format!("{}/", segment.trim_matches('/'))),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.prefix)
    }
}
