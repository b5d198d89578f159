// 🪣 Object Store - raw payload staging
// Bucket/key addressing over a local directory tree (one directory per bucket).

use crate::records::IngestionStamp;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Address of one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: &str, key: &str) -> Self {
        ObjectRef {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

/// ObjectStore - get/put/list by bucket + key
pub trait ObjectStore {
    fn get(&self, object: &ObjectRef) -> Result<Vec<u8>>;

    fn put(&self, object: &ObjectRef, body: &[u8]) -> Result<()>;

    /// Keys under `prefix`, sorted
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Key for a raw API batch covering item rows [start, end)
pub fn raw_object_key(prefix: &str, stamp: &IngestionStamp, start: usize, end: usize) -> String {
    format!("{}date={}/{}-{}.xml", prefix, stamp.date_string(), start, end)
}

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        LocalObjectStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_of(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if bucket.is_empty() || bucket.contains('/') || escapes || key.is_empty() {
            bail!("Invalid object address: {}/{}", bucket, key);
        }
        Ok(self.root.join(bucket).join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        let path = self.path_of(&object.bucket, &object.key)?;
        fs::read(&path).with_context(|| format!("Object not found: {}/{}", object.bucket, object.key))
    }

    fn put(&self, object: &ObjectRef, body: &[u8]) -> Result<()> {
        let path = self.path_of(&object.bucket, &object.key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, body)
            .with_context(|| format!("Failed to store {}/{}", object.bucket, object.key))
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_root = self.root.join(bucket);
        let mut keys = Vec::new();

        if bucket_root.exists() {
            walk(&bucket_root, &bucket_root, &mut keys)?;
        }

        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

fn walk(base: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            walk(base, &path, keys)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_key_layout() {
        let stamp = IngestionStamp::parse("2024-01-25").unwrap();
        assert_eq!(
            raw_object_key("bgg/raw/", &stamp, 0, 1200),
            "bgg/raw/date=2024-01-25/0-1200.xml"
        );
    }

    #[test]
    fn test_put_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let a = ObjectRef::new("bgg-raw", "raw/date=2024-01-25/0-1200.xml");
        let b = ObjectRef::new("bgg-raw", "raw/date=2024-01-25/1200-2400.xml");
        store.put(&b, b"<items />").unwrap();
        store.put(&a, b"<items></items>").unwrap();

        assert_eq!(store.get(&a).unwrap(), b"<items></items>");
        assert_eq!(
            store.list("bgg-raw", "raw/").unwrap(),
            vec![a.key.clone(), b.key.clone()]
        );
        assert!(store.list("bgg-raw", "other/").unwrap().is_empty());
        assert!(store.list("empty-bucket", "").unwrap().is_empty());
    }

    #[test]
    fn test_missing_object_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.get(&ObjectRef::new("bgg-raw", "nope.xml")).is_err());
    }

    #[test]
    fn test_keys_cannot_escape_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert!(store.put(&ObjectRef::new("bgg-raw", "../x.xml"), b"x").is_err());
        assert!(store.put(&ObjectRef::new("bgg-raw", "/etc/x.xml"), b"x").is_err());
        assert!(store.put(&ObjectRef::new("", "x.xml"), b"x").is_err());
    }
}
