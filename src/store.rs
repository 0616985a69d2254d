use anyhow::Context;
use async_trait::async_trait;
use rusoto_core::{Region, RusotoError};
use rusoto_s3::{GetObjectError, GetObjectRequest, PutObjectRequest, S3Client, S3};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::io::AsyncReadExt;

/// The shared object store all instances report into and the collector reads
/// from. Keys are written at most once and never rewritten, which is the only
/// concurrency control the run protocol relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object. `Ok(None)` means the key does not exist, any other
    /// problem (permissions, throttling, network) is an `Err` so callers can
    /// tell "not yet written" apart from "store unreachable".
    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> anyhow::Result<()>;
}

/// Object store backed by S3. Region and credentials come from the usual AWS
/// environment.
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    pub fn from_env() -> Self {
        S3Store {
            client: S3Client::new(Region::default()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            ..Default::default()
        };

        match self.client.get_object(request).await {
            Ok(output) => {
                let body = output
                    .body
                    .with_context(|| format!("s3://{}/{} has no body", bucket, key))?;
                let mut bytes = vec![];
                Box::pin(body.into_async_read())
                    .read_to_end(&mut bytes)
                    .await
                    .with_context(|| format!("Failed to read s3://{}/{}", bucket, key))?;
                Ok(Some(bytes))
            }
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => Ok(None),
            // S3 reports a missing key as a bare 404 when the caller lacks
            // ListBucket permission
            Err(RusotoError::Unknown(response)) if response.status.as_u16() == 404 => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to fetch s3://{}/{}", bucket, key))
            }
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> anyhow::Result<()> {
        let request = PutObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body: Some(body.into()),
            ..Default::default()
        };

        self.client
            .put_object(request)
            .await
            .with_context(|| format!("Failed to write s3://{}/{}", bucket, key))?;

        Ok(())
    }
}

/// In-memory object store used by the tests and handy for dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .expect("MemoryStore lock poisoned")
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .expect("MemoryStore lock poisoned")
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let objects = self.objects.lock().expect("MemoryStore lock poisoned");
        Ok(objects.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> anyhow::Result<()> {
        let mut objects = self.objects.lock().expect("MemoryStore lock poisoned");
        objects.insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_distinguishes_missing_from_present() -> anyhow::Result<()> {
        let store = MemoryStore::new();

        assert_eq!(store.get("bucket", "key").await?, None);

        store.put("bucket", "key", b"hello".to_vec()).await?;
        assert_eq!(store.get("bucket", "key").await?, Some(b"hello".to_vec()));
        assert_eq!(store.get("bucket", "other").await?, None);
        assert_eq!(store.get("other", "key").await?, None);

        Ok(())
    }
}
