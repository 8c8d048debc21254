//! Filesystem-backed implementations.
//!
//! [`LocalObjectIO`] maps `bucket/key` onto `<root>/bucket/key`, which lets
//! the job run against `s3://…` style locations on a developer machine or a
//! mounted volume. [`LocalMetricIO`] appends metric points as JSON lines.

use crate::storage::traits::{
    CloudIOError, CloudResult, ErrorKind, MetricIO, MetricPoint, ObjectIO, ObjectMetadata,
};
use glob::{Pattern, glob};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalObjectIO {
    root: PathBuf,
}

impl LocalObjectIO {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> CloudResult<PathBuf> {
        let rel = Path::new(bucket).join(key);
        // Keys must stay inside the root.
        if bucket.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("invalid object location {bucket}/{key}"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectIO for LocalObjectIO {
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CloudIOError::from_io(&e, format!("mkdir -p {}", parent.display())))?;
        }
        fs::write(&path, data)
            .map_err(|e| CloudIOError::from_io(&e, format!("write {}", path.display())))
    }

    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).map_err(|e| CloudIOError::from_io(&e, format!("read {bucket}/{key}")))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CloudIOError::from_io(
                &e,
                format!("delete {}", path.display()),
            )),
        }
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>> {
        let bucket_dir = self.object_path(bucket, "")?;
        if !bucket_dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!("{}/**/*", Pattern::escape(&bucket_dir.to_string_lossy()));
        let entries = glob(&pattern).map_err(|e| {
            CloudIOError::new(ErrorKind::InvalidInput, format!("invalid listing pattern: {e}"))
        })?;

        let mut objects = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| {
                CloudIOError::new(ErrorKind::Io, format!("listing {bucket}"))
                    .with_source(e.to_string())
            })?;
            if !path.is_file() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&bucket_dir) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if prefix.is_some_and(|p| !key.starts_with(p)) {
                continue;
            }
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            objects.push(ObjectMetadata { key, size });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        Ok(self.object_path(bucket, key)?.is_file())
    }

    fn rename_object(&self, bucket: &str, src_key: &str, dst_key: &str) -> CloudResult<()> {
        let src = self.object_path(bucket, src_key)?;
        let dst = self.object_path(bucket, dst_key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CloudIOError::from_io(&e, format!("mkdir -p {}", parent.display())))?;
        }
        fs::rename(&src, &dst).map_err(|e| {
            CloudIOError::from_io(&e, format!("rename {} -> {}", src.display(), dst.display()))
        })
    }
}

/// Appends metric points to `<dir>/<namespace>.jsonl`.
#[derive(Debug, Clone)]
pub struct LocalMetricIO {
    dir: PathBuf,
}

impl LocalMetricIO {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.jsonl"))
    }
}

impl MetricIO for LocalMetricIO {
    fn put_metric(&self, namespace: &str, metric: MetricPoint) -> CloudResult<()> {
        self.put_metrics(namespace, vec![metric])
    }

    fn put_metrics(&self, namespace: &str, metrics: Vec<MetricPoint>) -> CloudResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| CloudIOError::from_io(&e, format!("mkdir -p {}", self.dir.display())))?;
        let path = self.namespace_path(namespace);
        let mut buf = Vec::new();
        for metric in &metrics {
            serde_json::to_writer(&mut buf, metric).map_err(|e| {
                CloudIOError::new(ErrorKind::InvalidInput, "serialize metric point")
                    .with_source(e.to_string())
            })?;
            buf.push(b'\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CloudIOError::from_io(&e, format!("open {}", path.display())))?;
        file.write_all(&buf)
            .map_err(|e| CloudIOError::from_io(&e, format!("append {}", path.display())))
    }
}
