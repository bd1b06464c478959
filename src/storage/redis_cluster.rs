//! Redis storage backend for distributed rate limiting.
//!
//! Uses connection pooling for high performance. Counters are hashes
//! (`count`, `start`) updated by Lua scripts so the increment and the expiry
//! land in one atomic step. Every call is bounded by the operation timeout.

use std::future::Future;
use std::time::Duration;

use deadpool_redis::redis::{Cmd, FromRedisValue, RedisError, Script, cmd, pipe};
use deadpool_redis::{Config, Connection, Pool, Runtime};

use crate::clock::{SharedClock, duration_ms, system_clock};
use crate::error::{ConnectionError, RateLimitError, Result, StorageError};
use crate::storage::{Backend, BlockRecord, RateLimitRecord, Storage};

/// `KEYS[1]` counter hash, `ARGV[1]` window ms, `ARGV[2]` now ms.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('HSET', KEYS[1], 'start', ARGV[2])
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
local start = tonumber(redis.call('HGET', KEYS[1], 'start') or ARGV[2])
local violated = redis.call('HEXISTS', KEYS[1], 'violated')
return {count, start, ttl, violated}
"#;

/// `KEYS[1]` counter hash, `ARGV[1]` window start ms.
const DECREMENT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {}
end
local start = tonumber(redis.call('HGET', KEYS[1], 'start') or '0')
if start ~= tonumber(ARGV[1]) then
    return {}
end
local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
if count > 0 then
    count = redis.call('HINCRBY', KEYS[1], 'count', -1)
end
local violated = redis.call('HEXISTS', KEYS[1], 'violated')
return {count, start, redis.call('PTTL', KEYS[1]), violated}
"#;

/// `KEYS[1]` counter hash, `ARGV[1]` window start ms.
const FLAG_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
local start = tonumber(redis.call('HGET', KEYS[1], 'start') or '0')
if start ~= tonumber(ARGV[1]) then
    return 0
end
return redis.call('HSETNX', KEYS[1], 'violated', 1)
"#;

const READ_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {}
end
local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
local start = tonumber(redis.call('HGET', KEYS[1], 'start') or '0')
local violated = redis.call('HEXISTS', KEYS[1], 'violated')
return {count, start, redis.call('PTTL', KEYS[1]), violated}
"#;

/// Redis storage configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Key prefix for rate limit keys
    pub key_prefix: String,
    /// Connection timeout
    pub connection_timeout: Duration,
    /// Upper bound on any single store call, pool checkout included.
    pub operation_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rl:".to_string(),
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_millis(100),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the per-call timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

/// Redis storage backend for distributed rate limiting.
///
/// # Example
///
/// ```ignore
/// use flowgate::storage::{RedisStorage, RedisConfig};
///
/// let config = RedisConfig::new("redis://localhost:6379")
///     .with_prefix("myapp:rl:")
///     .with_pool_size(20);
///
/// let storage = RedisStorage::new(config).await?;
/// ```
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    operation_timeout: Duration,
    clock: SharedClock,
    increment_script: Script,
    decrement_script: Script,
    flag_script: Script,
    read_script: Script,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl RedisStorage {
    /// Create a new Redis storage from configuration.
    ///
    /// Fails if the server does not answer a `PING` within the connection
    /// timeout.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        // Test connection
        let ping = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
            let _: () = cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
            Ok::<(), ConnectionError>(())
        };
        tokio::time::timeout(config.connection_timeout, ping)
            .await
            .map_err(|_| ConnectionError::Timeout(config.connection_timeout))??;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            operation_timeout: config.operation_timeout,
            clock: system_clock(),
            increment_script: Script::new(INCREMENT_SCRIPT),
            decrement_script: Script::new(DECREMENT_SCRIPT),
            flag_script: Script::new(FLAG_SCRIPT),
            read_script: Script::new(READ_SCRIPT),
        })
    }

    /// Create a new Redis storage from a URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    /// Use a different clock for record timestamps and node expiry.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}c:{}", self.key_prefix, key)
    }

    fn block_key(&self, key: &str) -> String {
        format!("{}b:{}", self.key_prefix, key)
    }

    fn nodes_key(&self) -> String {
        format!("{}nodes", self.key_prefix)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()).into())
    }

    /// Run a store call under the operation timeout.
    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.operation_timeout, operation)
            .await
            .map_err(|_| RateLimitError::from(ConnectionError::Timeout(self.operation_timeout)))?
    }

    /// Send one command under the operation timeout.
    async fn query<T: FromRedisValue>(&self, command: &Cmd) -> Result<T> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            command.query_async(&mut conn).await.map_err(op_failed)
        })
        .await
    }

    /// Run a counter script under the operation timeout.
    async fn run_script<T: FromRedisValue>(&self, script: &Script, full_key: &str, args: &[u64]) -> Result<T> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let mut invocation = script.key(full_key);
            for arg in args {
                invocation.arg(*arg);
            }
            invocation.invoke_async(&mut conn).await.map_err(op_failed)
        })
        .await
    }

    /// Collect every key matching `pattern` with `SCAN`.
    async fn scan_keys(&self, conn: &mut Connection, pattern: &str) -> Result<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(conn)
                .await
                .map_err(op_failed)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    async fn scan_blocks(&self) -> Result<Vec<(String, BlockRecord)>> {
        let prefix = self.block_key("");
        let now = self.clock.now_ms();
        let mut conn = self.get_conn().await?;
        let keys = self.scan_keys(&mut conn, &format!("{prefix}*")).await?;

        let mut blocked = Vec::with_capacity(keys.len());
        for full_key in keys {
            let raw: Option<String> = cmd("GET")
                .arg(&full_key)
                .query_async(&mut conn)
                .await
                .map_err(op_failed)?;
            // Expired between SCAN and GET
            let Some(json) = raw else { continue };
            let block = parse_block(&json)?;
            if block.is_active(now) {
                let key = full_key.strip_prefix(&prefix).unwrap_or(&full_key).to_string();
                blocked.push((key, block));
            }
        }
        Ok(blocked)
    }

    async fn scan_counters(&self) -> Result<Vec<(String, RateLimitRecord)>> {
        let prefix = self.counter_key("");
        let mut conn = self.get_conn().await?;
        let keys = self.scan_keys(&mut conn, &format!("{prefix}*")).await?;

        let mut counters = Vec::with_capacity(keys.len());
        for full_key in keys {
            let values: Vec<i64> = self
                .read_script
                .key(&full_key)
                .invoke_async(&mut conn)
                .await
                .map_err(op_failed)?;
            if let Some(record) = parse_record(&values, self.clock.now_ms())? {
                let key = full_key.strip_prefix(&prefix).unwrap_or(&full_key).to_string();
                counters.push((key, record));
            }
        }
        Ok(counters)
    }
}

fn op_failed(e: RedisError) -> RateLimitError {
    StorageError::OperationFailed(e.to_string()).into()
}

fn parse_block(json: &str) -> Result<BlockRecord> {
    serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()).into())
}

/// Turn a `{count, start, pttl, violated}` script reply into a record.
fn parse_record(values: &[i64], now_ms: u64) -> Result<Option<RateLimitRecord>> {
    match values {
        [] => Ok(None),
        [count, start, ttl, violated] => {
            let ttl = u64::try_from(*ttl).unwrap_or(0);
            Ok(Some(RateLimitRecord {
                count: u64::try_from(*count).unwrap_or(0),
                window_started_at: u64::try_from(*start).unwrap_or(0),
                expires_at: now_ms.saturating_add(ttl),
                violated: *violated != 0,
            }))
        }
        other => Err(StorageError::UnexpectedResponse(format!("{other:?}")).into()),
    }
}

impl Storage for RedisStorage {
    fn backend(&self) -> Backend {
        Backend::Shared
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitRecord> {
        let now = self.clock.now_ms();
        let values: Vec<i64> = self
            .run_script(
                &self.increment_script,
                &self.counter_key(key),
                &[duration_ms(window).max(1), now],
            )
            .await?;

        parse_record(&values, now)?.ok_or_else(|| {
            StorageError::UnexpectedResponse("increment returned no record".into()).into()
        })
    }

    async fn decrement(&self, key: &str, window_started_at: u64) -> Result<Option<RateLimitRecord>> {
        let values: Vec<i64> = self
            .run_script(&self.decrement_script, &self.counter_key(key), &[window_started_at])
            .await?;
        parse_record(&values, self.clock.now_ms())
    }

    async fn flag_violation(&self, key: &str, window_started_at: u64) -> Result<bool> {
        let flagged: i64 = self
            .run_script(&self.flag_script, &self.counter_key(key), &[window_started_at])
            .await?;
        Ok(flagged == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        let values: Vec<i64> = self
            .run_script(&self.read_script, &self.counter_key(key), &[])
            .await?;
        parse_record(&values, self.clock.now_ms())
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _: () = self.query(cmd("DEL").arg(self.counter_key(key))).await?;
        Ok(())
    }

    async fn set_block(&self, key: &str, duration: Duration, reason: &str) -> Result<BlockRecord> {
        let block = BlockRecord::new(self.clock.now_ms(), duration, reason);
        let json = serde_json::to_string(&block)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let _: () = self
            .query(
                cmd("SET")
                    .arg(self.block_key(key))
                    .arg(json)
                    .arg("PX")
                    .arg(duration_ms(duration).max(1)),
            )
            .await?;
        Ok(block)
    }

    async fn get_block(&self, key: &str) -> Result<Option<BlockRecord>> {
        let raw: Option<String> = self.query(cmd("GET").arg(self.block_key(key))).await?;
        match raw {
            Some(json) => {
                let block = parse_block(&json)?;
                Ok(block.is_active(self.clock.now_ms()).then_some(block))
            }
            None => Ok(None),
        }
    }

    async fn remove_block(&self, key: &str) -> Result<()> {
        let _: () = self.query(cmd("DEL").arg(self.block_key(key))).await?;
        Ok(())
    }

    async fn blocked_keys(&self) -> Result<Vec<(String, BlockRecord)>> {
        self.bounded(self.scan_blocks()).await
    }

    async fn counters(&self) -> Result<Vec<(String, RateLimitRecord)>> {
        self.bounded(self.scan_counters()).await
    }

    async fn touch_node(&self, node_id: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now_ms().saturating_add(duration_ms(ttl));
        let _: () = self
            .query(cmd("ZADD").arg(self.nodes_key()).arg(expires_at).arg(node_id))
            .await?;
        Ok(())
    }

    async fn remove_node(&self, node_id: &str) -> Result<()> {
        let _: () = self
            .query(cmd("ZREM").arg(self.nodes_key()).arg(node_id))
            .await?;
        Ok(())
    }

    async fn live_node_count(&self) -> Result<u64> {
        let nodes_key = self.nodes_key();
        let now = self.clock.now_ms();

        self.bounded(async {
            let mut conn = self.get_conn().await?;
            pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(&nodes_key)
                .arg("-inf")
                .arg(now)
                .ignore()
                .cmd("ZCARD")
                .arg(&nodes_key)
                .query_async(&mut conn)
                .await
                .map(|(count,): (u64,)| count)
                .map_err(op_failed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig::new("redis://localhost:6380")
            .with_prefix("test:")
            .with_pool_size(5)
            .with_operation_timeout(Duration::from_millis(50));

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.key_prefix, "test:");
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.operation_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_parse_record() {
        assert_eq!(parse_record(&[], 1_000).unwrap(), None);

        let record = parse_record(&[3, 500, 59_000, 0], 1_000).unwrap().unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(record.window_started_at, 500);
        assert_eq!(record.expires_at, 60_000);
        assert!(!record.violated);

        assert!(parse_record(&[7, 500, 59_000, 1], 1_000).unwrap().unwrap().violated);

        // A key without expiry reads as already due
        let record = parse_record(&[1, 500, -1, 0], 1_000).unwrap().unwrap();
        assert_eq!(record.expires_at, 1_000);

        assert!(parse_record(&[1, 2, 3], 1_000).is_err());
    }
}
