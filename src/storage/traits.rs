//! Core traits for the external services the job talks to.
//!
//! These traits are synchronous. Implementations that wrap async SDKs are
//! expected to block internally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

// ============================================================================
// Core Error Type
// ============================================================================

/// Error returned by storage, metric and catalog backends.
#[derive(Debug, Clone)]
pub struct CloudIOError {
    pub message: String,
    pub kind: ErrorKind,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    AlreadyExists,
    InvalidInput,
    Io,
    ServiceUnavailable,
    Other,
}

impl fmt::Display for CloudIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl Error for CloudIOError {}

impl CloudIOError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Map a filesystem error, keeping `NotFound` and permission failures distinct.
    pub fn from_io(err: &std::io::Error, message: impl Into<String>) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::Io,
        };
        Self::new(kind, message).with_source(err.to_string())
    }
}

pub type CloudResult<T> = Result<T, CloudIOError>;

// ============================================================================
// ObjectIO - Object Storage
// ============================================================================

/// Metadata for an object in storage
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
}

/// Trait for object storage operations
pub trait ObjectIO: Send + Sync {
    /// Upload data to object storage, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if permissions are not enough or the upload fails
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()>;

    /// Download data from object storage
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist, permissions are not enough,
    /// or the download fails
    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>>;

    /// Delete an object. Deleting a missing object is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if permissions are not enough or the deletion fails
    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()>;

    /// List objects with a prefix, sorted by key.
    ///
    /// A missing bucket lists as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if permissions are not enough or the listing fails
    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>>;

    /// Check if an object exists
    ///
    /// # Errors
    ///
    /// Returns an error if permissions are not enough or the check fails
    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool>;

    /// Copy an object within or between buckets
    ///
    /// # Errors
    ///
    /// Returns an error if the source doesn't exist, permissions are not enough, or the copy fails
    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> CloudResult<()> {
        let data = self.get_object(src_bucket, src_key)?;
        self.put_object(dst_bucket, dst_key, &data)
    }

    /// Move an object to a new key in the same bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the source doesn't exist or either side of the move fails
    fn rename_object(&self, bucket: &str, src_key: &str, dst_key: &str) -> CloudResult<()> {
        self.copy_object(bucket, src_key, bucket, dst_key)?;
        self.delete_object(bucket, src_key)
    }
}

// ============================================================================
// MetricIO - Metrics and Monitoring
// ============================================================================

/// A metric data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub timestamp: i64, // Unix timestamp
    pub tags: HashMap<String, String>,
}

/// Trait for metrics operations
pub trait MetricIO: Send + Sync {
    /// Put a single metric
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is not writable or the operation fails
    fn put_metric(&self, namespace: &str, metric: MetricPoint) -> CloudResult<()>;

    /// Put multiple metrics
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is not writable or the operation fails
    fn put_metrics(&self, namespace: &str, metrics: Vec<MetricPoint>) -> CloudResult<()> {
        for metric in metrics {
            self.put_metric(namespace, metric)?;
        }
        Ok(())
    }
}
