use super::ByteRange;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Address of an object: `scheme://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::InvalidInput(format!("not an object URI: {}", uri)))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("object URI has no key: {}", uri)))?;

        if scheme.is_empty() || bucket.is_empty() || key.is_empty() {
            return Err(Error::InvalidInput(format!("incomplete object URI: {}", uri)));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Location of a sibling object with `suffix` appended to the key.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            scheme: self.scheme.clone(),
            bucket: self.bucket.clone(),
            key: format!("{}{}", self.key, suffix),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Object storage operations the object backend depends on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Size of the object, without fetching it.
    async fn head(&self, location: &ObjectLocation) -> Result<u64>;

    /// Whole object contents.
    async fn get(&self, location: &ObjectLocation) -> Result<Bytes>;

    /// Inclusive byte range of the object.
    async fn get_range(&self, location: &ObjectLocation, range: ByteRange) -> Result<Bytes>;

    /// Time-limited URL for a direct GET, scoped to `range` when given.
    async fn presign(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
        expiry: Duration,
    ) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory object store; presigned URLs use the `memory://` scheme.
    #[derive(Default)]
    pub struct MemoryObjectStore {
        objects: Mutex<HashMap<String, Bytes>>,
        presign_failures: Mutex<HashSet<(u64, u64)>>,
    }

    impl MemoryObjectStore {
        pub fn insert(&self, uri: &str, bytes: impl Into<Bytes>) {
            self.objects
                .lock()
                .unwrap()
                .insert(uri.to_string(), bytes.into());
        }

        /// Make presigning of exactly this range fail.
        pub fn fail_presign(&self, range: ByteRange) {
            self.presign_failures
                .lock()
                .unwrap()
                .insert((range.start, range.end));
        }

        fn object(&self, location: &ObjectLocation) -> Result<Bytes> {
            self.objects
                .lock()
                .unwrap()
                .get(&location.to_string())
                .cloned()
                .ok_or_else(|| Error::NotFound(location.to_string()))
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryObjectStore {
        async fn head(&self, location: &ObjectLocation) -> Result<u64> {
            Ok(self.object(location)?.len() as u64)
        }

        async fn get(&self, location: &ObjectLocation) -> Result<Bytes> {
            self.object(location)
        }

        async fn get_range(&self, location: &ObjectLocation, range: ByteRange) -> Result<Bytes> {
            let bytes = self.object(location)?;
            let end = (range.end as usize + 1).min(bytes.len());
            let start = (range.start as usize).min(end);
            Ok(bytes.slice(start..end))
        }

        async fn presign(
            &self,
            location: &ObjectLocation,
            range: Option<ByteRange>,
            expiry: Duration,
        ) -> Result<String> {
            match range {
                Some(r) if self.presign_failures.lock().unwrap().contains(&(r.start, r.end)) => {
                    Err(Error::Upstream("presign refused".to_string()))
                }
                Some(r) => Ok(format!(
                    "memory://{}/{}?range={}-{}&expires={}",
                    location.bucket,
                    location.key,
                    r.start,
                    r.end,
                    expiry.as_secs()
                )),
                None => Ok(format!(
                    "memory://{}/{}?expires={}",
                    location.bucket,
                    location.key,
                    expiry.as_secs()
                )),
            }
        }
    }
}
