use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::models::job::FieldMap;

/// Key layout shared by every component that touches the state store.
pub mod keys {
    pub fn job(job_id: &str) -> String {
        format!("job_status:{job_id}")
    }

    pub fn user_jobs(owner: &str) -> String {
        format!("user_jobs:{owner}")
    }

    pub fn idempotency(owner: &str, job_type: &str, token: &str) -> String {
        format!("upload_idempotency:{owner}:{job_type}:{token}")
    }

    pub fn enqueue_guard(job_id: &str) -> String {
        format!("job_enqueue_once:{job_id}")
    }

    pub fn daily_usage(owner: &str, day: &str) -> String {
        format!("user_daily_jobs:{owner}:{day}")
    }
}

/// Key/value + list substrate the job services coordinate through.
///
/// Every call is bounded; implementations report an elapsed bound as
/// [`StoreError::Timeout`] and never retry internally.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Full field map stored under `key`; empty when there is no record.
    async fn get_fields(&self, key: &str) -> Result<FieldMap, StoreError>;

    /// Merge `fields` into the map stored under `key`.
    async fn set_fields(&self, key: &str, fields: &FieldMap) -> Result<(), StoreError>;

    /// Merge `fields` into `key` only if `guard_field` currently holds `expected`
    /// (`None` = field absent). Returns whether the write landed.
    async fn compare_and_set_fields(
        &self,
        key: &str,
        guard_field: &str,
        expected: Option<&str>,
        fields: &FieldMap,
    ) -> Result<bool, StoreError>;

    /// Pipelined full reads, one map per key in input order.
    async fn get_fields_batch(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError>;

    /// Pipelined partial reads: for each key, the values of `fields` in order.
    async fn get_projection_batch(
        &self,
        keys: &[String],
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomic "set if not present, with expiry". Returns `true` for the single winner.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Increment a counter, applying `ttl` when the counter is created.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Prepend to a list so that index 0 is the most recent entry.
    async fn list_append(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Inclusive range; negative indices count from the end (`-1` = last).
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;

    async fn list_length(&self, key: &str) -> Result<u64, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("State store call exceeded {0:?}")]
    Timeout(Duration),
}

/// Compare-and-set on one hash field. ARGV: guard field, has-expected flag,
/// expected value, then field/value pairs.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if ARGV[2] == '1' then
  if current ~= ARGV[3] then return 0 end
else
  if current then return 0 end
end
redis.call('HSET', KEYS[1], unpack(ARGV, 4))
return 1
"#;

/// Open one multiplexed connection for the lifetime of the process.
pub async fn connect_redis(url: &str, timeout: Duration) -> Result<MultiplexedConnection, StoreError> {
    let client = redis::Client::open(url)?;
    let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
        .await
        .map_err(|_| StoreError::Timeout(timeout))??;
    Ok(conn)
}

/// Redis-backed [`StateStore`] over a shared multiplexed connection.
pub struct RedisStateStore {
    conn: MultiplexedConnection,
    timeout: Duration,
    cas: redis::Script,
}

impl RedisStateStore {
    pub fn new(conn: MultiplexedConnection, timeout: Duration) -> Self {
        Self {
            conn,
            timeout,
            cas: redis::Script::new(COMPARE_AND_SET),
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(StoreError::Redis)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn field_pairs(fields: &FieldMap) -> Vec<(&str, &str)> {
    fields
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { redis::cmd("PING").query_async::<String>(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn get_fields(&self, key: &str) -> Result<FieldMap, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.hgetall::<_, HashMap<String, String>>(key).await })
            .await
    }

    async fn set_fields(&self, key: &str, fields: &FieldMap) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let pairs = field_pairs(fields);
        self.bounded(async move { conn.hset_multiple::<_, _, _, ()>(key, &pairs).await })
            .await
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
        let mut conn = self.conn.clone();
        let mut invocation = self.cas.key(key);
        invocation
            .arg(guard_field)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default());
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let applied: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(applied == 1)
    }

    async fn get_fields_batch(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }
        let mut conn = self.conn.clone();
        self.bounded(async move { pipe.query_async::<Vec<FieldMap>>(&mut conn).await })
            .await
    }

    async fn get_projection_batch(
        &self,
        keys: &[String],
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, StoreError> {
        if keys.is_empty() || fields.is_empty() {
            return Ok(vec![Vec::new(); keys.len()]);
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HMGET").arg(key).arg(fields);
        }
        let mut conn = self.conn.clone();
        self.bounded(async move { pipe.query_async::<Vec<Vec<Option<String>>>>(&mut conn).await })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await })
            .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .bounded(async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .query_async::<Option<String>>(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl_secs(ttl) as i64;
        self.bounded(async move { conn.expire::<_, ()>(key, secs).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl_secs(ttl) as i64;
        self.bounded(async move {
            let value: i64 = conn.incr(key, 1).await?;
            if value == 1 {
                conn.expire::<_, ()>(key, secs).await?;
            }
            Ok(value)
        })
        .await
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.lpush::<_, _, ()>(key, value).await })
            .await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.lrange::<_, Vec<String>>(key, start, stop).await })
            .await
    }

    async fn list_length(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.llen::<_, u64>(key).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::job("abc"), "job_status:abc");
        assert_eq!(keys::user_jobs("a@b.com"), "user_jobs:a@b.com");
        assert_eq!(
            keys::idempotency("a@b.com", "OCR", "tok-1"),
            "upload_idempotency:a@b.com:OCR:tok-1"
        );
        assert_eq!(keys::enqueue_guard("abc"), "job_enqueue_once:abc");
    }

    #[test]
    fn test_ttl_is_at_least_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(900)), 900);
    }
}
