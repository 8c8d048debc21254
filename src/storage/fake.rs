//! In-memory implementations for testing.
//!
//! Both fakes are cheaply cloneable handles onto shared state, so a test can
//! keep one clone for assertions while the job owns another.

use crate::storage::traits::{
    CloudIOError, CloudResult, ErrorKind, MetricIO, MetricPoint, ObjectIO, ObjectMetadata,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type BucketStorage = Arc<Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>>;

// ============================================================================
// FakeObjectIO
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeObjectIO {
    storage: BucketStorage,
    fail_writes: Arc<AtomicBool>,
}

impl FakeObjectIO {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write (put, delete, copy) fail with `ServiceUnavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All keys in `bucket`, sorted.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.storage
            .lock()
            .expect("storage mutex poisoned")
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_writable(&self, bucket: &str, key: &str) -> CloudResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CloudIOError::new(
                ErrorKind::ServiceUnavailable,
                format!("write to {bucket}/{key} rejected"),
            ));
        }
        Ok(())
    }
}

impl ObjectIO for FakeObjectIO {
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()> {
        self.check_writable(bucket, key)?;
        self.storage
            .lock()
            .expect("storage mutex poisoned")
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        storage
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or_else(|| {
                CloudIOError::new(
                    ErrorKind::NotFound,
                    format!("Object {bucket}/{key} not found"),
                )
            })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        self.check_writable(bucket, key)?;
        if let Some(bucket_map) = self
            .storage
            .lock()
            .expect("storage mutex poisoned")
            .get_mut(bucket)
        {
            bucket_map.remove(key);
        }
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        let Some(bucket_map) = storage.get(bucket) else {
            return Ok(Vec::new());
        };
        let objects = bucket_map
            .iter()
            .filter(|(key, _)| prefix.is_none_or(|p| key.starts_with(p)))
            .map(|(key, data)| ObjectMetadata {
                key: key.clone(),
                size: data.len() as u64,
            })
            .collect();
        Ok(objects)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        Ok(storage.get(bucket).is_some_and(|b| b.contains_key(key)))
    }
}

// ============================================================================
// FakeMetricIO
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeMetricIO {
    metrics: Arc<Mutex<HashMap<String, Vec<MetricPoint>>>>,
    unavailable: Arc<AtomicBool>,
}

impl FakeMetricIO {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail with `ServiceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Points published to `namespace`, in publish order.
    #[must_use]
    pub fn points(&self, namespace: &str) -> Vec<MetricPoint> {
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricIO for FakeMetricIO {
    fn put_metric(&self, namespace: &str, metric: MetricPoint) -> CloudResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CloudIOError::new(
                ErrorKind::ServiceUnavailable,
                format!("metric namespace {namespace} unavailable"),
            ));
        }
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .entry(namespace.to_string())
            .or_default()
            .push(metric);
        Ok(())
    }
}
