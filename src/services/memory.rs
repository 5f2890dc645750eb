//! In-process backends for `STATE_BACKEND=memory` and for tests.
//!
//! They honour the same contracts as the Redis/S3 implementations: the
//! conditional writes are atomic under a single mutex, string keys expire,
//! lists read newest-first.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::models::job::{FieldMap, QueuePayload};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::state_store::{StateStore, StoreError};
use crate::services::storage::{parse_storage_uri, BlobStore, StorageError, STORAGE_URI_SCHEME};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct StoreInner {
    hashes: HashMap<String, FieldMap>,
    strings: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl StoreInner {
    fn live_string(&mut self, key: &str) -> Option<&mut (String, Option<Instant>)> {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.strings.remove(key);
        }
        self.strings.get_mut(key)
    }
}

/// Mutex-guarded [`StateStore`].
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Redis LRANGE index semantics over a list of `len` entries.
fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_fields(&self, key: &str) -> Result<FieldMap, StoreError> {
        Ok(lock(&self.inner).hashes.get(key).cloned().unwrap_or_default())
    }

    async fn set_fields(&self, key: &str, fields: &FieldMap) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut inner = lock(&self.inner);
        let entry = inner.hashes.entry(key.to_string()).or_default();
        entry.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn compare_and_set_fields(
        &self,
        key: &str,
        guard_field: &str,
        expected: Option<&str>,
        fields: &FieldMap,
    ) -> Result<bool, StoreError> {
        if fields.is_empty() {
            return Ok(false);
        }
        let mut inner = lock(&self.inner);
        let current = inner
            .hashes
            .get(key)
            .and_then(|map| map.get(guard_field))
            .map(String::as_str);
        if current != expected {
            return Ok(false);
        }
        let entry = inner.hashes.entry(key.to_string()).or_default();
        entry.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(true)
    }

    async fn get_fields_batch(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        let inner = lock(&self.inner);
        Ok(keys
            .iter()
            .map(|key| inner.hashes.get(key).cloned().unwrap_or_default())
            .collect())
    }

    async fn get_projection_batch(
        &self,
        keys: &[String],
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, StoreError> {
        let inner = lock(&self.inner);
        Ok(keys
            .iter()
            .map(|key| {
                let map = inner.hashes.get(key);
                fields
                    .iter()
                    .map(|field| map.and_then(|m| m.get(*field)).cloned())
                    .collect()
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = lock(&self.inner);
        Ok(inner.live_string(key).map(|(value, _)| value.clone()))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        lock(&self.inner)
            .strings
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = lock(&self.inner);
        if inner.live_string(key).is_some() {
            return Ok(false);
        }
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        if let Some((_, deadline)) = inner.live_string(key) {
            *deadline = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        inner.strings.remove(key);
        inner.hashes.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut inner = lock(&self.inner);
        let next = match inner.live_string(key) {
            Some((value, _)) => {
                let next = value.parse::<i64>().unwrap_or(0) + 1;
                *value = next.to_string();
                next
            }
            None => {
                inner
                    .strings
                    .insert(key.to_string(), ("1".to_string(), Some(Instant::now() + ttl)));
                1
            }
        };
        Ok(next)
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.inner)
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let inner = lock(&self.inner);
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match range_bounds(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn list_length(&self, key: &str) -> Result<u64, StoreError> {
        Ok(lock(&self.inner)
            .lists
            .get(key)
            .map(|list| list.len() as u64)
            .unwrap_or(0))
    }
}

/// In-process [`JobQueue`] that records every pushed payload.
#[derive(Default)]
pub struct MemoryJobQueue {
    queues: Mutex<HashMap<String, Vec<QueuePayload>>>,
    unavailable: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages pushed to `queue`, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<QueuePayload> {
        lock(&self.queues).get(queue).cloned().unwrap_or_default()
    }

    /// Make every subsequent call fail, as an unreachable broker would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("memory queue marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, queue: &str, payload: &QueuePayload) -> Result<(), QueueError> {
        self.check()?;
        lock(&self.queues)
            .entry(queue.to_string())
            .or_default()
            .push(payload.clone());
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        self.check()?;
        Ok(lock(&self.queues)
            .get(queue)
            .map(|messages| messages.len() as u64)
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check()
    }
}

/// In-process [`BlobStore`]; signed links use a `memory://` scheme.
pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("local")
    }
}

impl MemoryBlobStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn object(&self, storage_uri: &str) -> Option<Vec<u8>> {
        let (_, path) = parse_storage_uri(storage_uri).ok()?;
        lock(&self.objects).get(path).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, data: &[u8], destination: &str, _content_type: &str) -> Result<String, StorageError> {
        let path = destination.trim_start_matches('/').to_string();
        lock(&self.objects).insert(path, data.to_vec());
        Ok(self.storage_uri(destination))
    }

    async fn signed_download_url(
        &self,
        storage_uri: &str,
        ttl: Duration,
        filename: &str,
    ) -> Result<String, StorageError> {
        let (bucket, path) = parse_storage_uri(storage_uri)?;
        if bucket != self.bucket {
            return Err(StorageError::InvalidUri(storage_uri.to_string()));
        }
        Ok(format!(
            "memory://{bucket}/{path}?expires_in={}&filename={filename}",
            ttl.as_secs()
        ))
    }

    fn storage_uri(&self, destination: &str) -> String {
        format!("{STORAGE_URI_SCHEME}{}/{}", self.bucket, destination.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_list_reads_newest_first_with_redis_ranges() {
        let store = MemoryStateStore::new();
        for id in ["a", "b", "c", "d"] {
            store.list_append("jobs", id).await.unwrap();
        }

        assert_eq!(store.list_range("jobs", 0, -1).await.unwrap(), vec!["d", "c", "b", "a"]);
        assert_eq!(store.list_range("jobs", 1, 2).await.unwrap(), vec!["c", "b"]);
        assert_eq!(store.list_range("jobs", 2, 10).await.unwrap(), vec!["b", "a"]);
        assert!(store.list_range("jobs", 5, 8).await.unwrap().is_empty());
        assert!(store.list_range("missing", 0, -1).await.unwrap().is_empty());
        assert_eq!(store.list_length("jobs").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_set_if_absent_has_single_winner_until_expiry() {
        let store = MemoryStateStore::new();
        assert!(store.set_if_absent("guard", "1", Duration::from_millis(30)).await.unwrap());
        assert!(!store.set_if_absent("guard", "1", Duration::from_secs(5)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("guard").await.unwrap().is_none());
        assert!(store.set_if_absent("guard", "2", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_set_checks_guard_field() {
        let store = MemoryStateStore::new();
        let first = fields(&[("status", "QUEUED"), ("version", "1")]);

        assert!(store.compare_and_set_fields("job", "version", None, &first).await.unwrap());
        assert!(!store.compare_and_set_fields("job", "version", None, &first).await.unwrap());

        let next = fields(&[("status", "PROCESSING"), ("version", "2")]);
        assert!(!store.compare_and_set_fields("job", "version", Some("0"), &next).await.unwrap());
        assert!(store.compare_and_set_fields("job", "version", Some("1"), &next).await.unwrap());
        assert_eq!(store.get_fields("job").await.unwrap().get("status").map(String::as_str), Some("PROCESSING"));
    }

    #[tokio::test]
    async fn test_increment_starts_at_one() {
        let store = MemoryStateStore::new();
        assert_eq!(store.increment("count", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.increment("count", Duration::from_secs(60)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_queue_fails_calls() {
        let queue = MemoryJobQueue::new();
        queue.set_unavailable(true);
        assert!(queue.depth("q").await.is_err());
        queue.set_unavailable(false);
        assert_eq!(queue.depth("q").await.unwrap(), 0);
    }
}
