//! Key/value cache client with a Redis backend and an in-memory fallback.
//!
//! When a Redis URL is configured, all operations go to Redis through one
//! lazily-connected [`ConnectionManager`] shared by every caller of the
//! client. Calls are bounded by a per-operation timeout and guarded by a
//! [`CircuitBreaker`], so an unreachable server yields a fast
//! [`PlatformError`] instead of a blocked request. Without a Redis URL the
//! client keeps entries in a process-local, TTL-aware map.

use crate::{CircuitBreaker, CircuitBreakerConfig, PlatformError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

/// Cache client configuration.
#[derive(Debug, Clone)]
pub struct CacheClientConfig {
    /// Redis connection URL; `None` selects the in-memory backend
    pub redis_url: Option<String>,
    /// Namespace prepended to every key (`<namespace>:<key>`)
    pub namespace: String,
    /// TTL applied when a caller passes `None`
    pub default_ttl: Duration,
    /// Upper bound on a single Redis round trip, connect included
    pub operation_timeout: Duration,
    /// Maximum number of in-memory entries
    pub local_cache_size: usize,
    /// Circuit breaker guarding the Redis backend
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for CacheClientConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            namespace: "default".to_string(),
            default_ttl: Duration::from_secs(3600),
            operation_timeout: Duration::from_millis(500),
            local_cache_size: 10_000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl CacheClientConfig {
    /// Use Redis at the given URL.
    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Set the key namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default TTL.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the per-operation timeout.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the maximum number of in-memory entries.
    #[must_use]
    pub const fn with_local_cache_size(mut self, size: usize) -> Self {
        self.local_cache_size = size;
        self
    }

    /// Set the circuit breaker configuration.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

/// How a write treats an existing key and a full local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Overwrite,
    IfAbsent,
    /// Overwrite; the entry may be dropped to make room for other writes
    Evictable,
}

struct LocalCacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
    evictable: bool,
}

impl LocalCacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Minimum spacing between full sweeps of a saturated local store.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct LocalEntries {
    lru: LruCache<String, LocalCacheEntry>,
    last_sweep: Option<Instant>,
}

impl LocalEntries {
    fn is_full(&self) -> bool {
        self.lru.len() >= self.lru.cap().get()
    }

    /// Free one slot if possible: expired entries go first (oldest writes,
    /// then a full sweep no more than once per [`SWEEP_INTERVAL`]), then the
    /// least recently written evictable entry. Returns whether a slot is free.
    fn make_room(&mut self, now: Instant) -> bool {
        while self.lru.peek_lru().is_some_and(|(_, entry)| !entry.is_live(now)) {
            self.lru.pop_lru();
        }
        if !self.is_full() {
            return true;
        }

        let sweep_due = self
            .last_sweep
            .map_or(true, |at| now.duration_since(at) >= SWEEP_INTERVAL);
        if sweep_due {
            self.last_sweep = Some(now);
            let expired: Vec<String> = self
                .lru
                .iter()
                .filter(|(_, entry)| !entry.is_live(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                self.lru.pop(key);
            }
            if !self.is_full() {
                return true;
            }
        }

        let victim = self
            .lru
            .iter()
            .rev()
            .find(|(_, entry)| entry.evictable)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                self.lru.pop(&key);
                true
            }
            None => false,
        }
    }
}

/// Process-local entries, bounded to `local_cache_size`. Live entries are
/// only evicted when written with [`CacheClient::set_evictable`]; a write
/// that finds the store full of other live entries fails with
/// [`PlatformError::Unavailable`].
struct MemoryBackend {
    entries: RwLock<LocalEntries>,
}

impl MemoryBackend {
    fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LocalEntries {
                lru: LruCache::new(capacity),
                last_sweep: None,
            }),
        }
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().await;
        entries
            .lru
            .peek(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    async fn set(
        &self,
        key: String,
        value: &[u8],
        ttl: Duration,
        mode: WriteMode,
    ) -> Result<bool, PlatformError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let present = entries.lru.peek(&key).map(|entry| entry.is_live(now));
        if mode == WriteMode::IfAbsent && present == Some(true) {
            return Ok(false);
        }
        if present.is_none() && entries.is_full() && !entries.make_room(now) {
            warn!(
                target: "rust_common.cache",
                capacity = entries.lru.cap().get(),
                "Local cache full of live entries, refusing write"
            );
            return Err(PlatformError::unavailable("local cache full"));
        }
        entries.lru.push(
            key,
            LocalCacheEntry {
                value: value.to_vec(),
                expires_at: now + ttl,
                evictable: mode == WriteMode::Evictable,
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .lru
            .peek(key)
            .is_some_and(|entry| entry.is_live(Instant::now()))
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.lru.pop(key);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.lru.len()
    }
}

struct RedisBackend {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl RedisBackend {
    async fn connection(&self) -> Result<ConnectionManager, PlatformError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!(target: "rust_common.cache", "Connecting to Redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(manager.clone())
    }

    /// Run one command through the breaker and the timeout.
    async fn run<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T, PlatformError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        if !self.breaker.allow_request().await {
            return Err(PlatformError::circuit_open("redis"));
        }

        let outcome = tokio::time::timeout(self.timeout, async {
            let conn = self.connection().await?;
            command(conn).await.map_err(PlatformError::from)
        })
        .await;

        match outcome {
            Ok(Ok(value)) => {
                self.breaker.record_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                if err.is_unreachable() {
                    self.breaker.record_failure().await;
                    let breaker_state = self.breaker.state().await;
                    warn!(
                        target: "rust_common.cache",
                        operation,
                        error = %err,
                        breaker = breaker_state.as_str(),
                        "Redis unreachable"
                    );
                } else {
                    // Error replies such as LOADING or READONLY.
                    self.breaker.record_inconclusive().await;
                    debug!(
                        target: "rust_common.cache",
                        operation,
                        error = %err,
                        "Redis command failed"
                    );
                }
                Err(err)
            }
            Err(_) => {
                self.breaker.record_failure().await;
                let breaker_state = self.breaker.state().await;
                warn!(
                    target: "rust_common.cache",
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    breaker = breaker_state.as_str(),
                    "Redis operation timed out"
                );
                Err(PlatformError::timeout(format!("redis {operation}")))
            }
        }
    }
}

enum Backend {
    Memory(MemoryBackend),
    Redis(RedisBackend),
}

/// Namespaced key/value cache.
pub struct CacheClient {
    config: CacheClientConfig,
    backend: Backend,
}

impl CacheClient {
    /// Create a new cache client.
    ///
    /// No network traffic happens here; Redis is connected on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::InvalidInput`] if the Redis URL cannot be parsed.
    pub fn new(config: CacheClientConfig) -> Result<Self, PlatformError> {
        let backend = match &config.redis_url {
            Some(url) => {
                // The URL may carry credentials, keep it out of the message.
                let client = redis::Client::open(url.as_str())
                    .map_err(|e| PlatformError::invalid_input(format!("Invalid Redis URL: {}", e.category())))?;
                Backend::Redis(RedisBackend {
                    client,
                    connection: OnceCell::new(),
                    breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
                    timeout: config.operation_timeout,
                })
            }
            None => Backend::Memory(MemoryBackend::new(config.local_cache_size)),
        };

        Ok(Self { config, backend })
    }

    /// In-memory client with the given namespace.
    #[must_use]
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self {
            backend: Backend::Memory(MemoryBackend::new(
                CacheClientConfig::default().local_cache_size,
            )),
            config: CacheClientConfig::default().with_namespace(namespace),
        }
    }

    /// Get a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend is unreachable or fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlatformError> {
        let key = self.namespaced_key(key);
        match &self.backend {
            Backend::Memory(memory) => Ok(memory.get(&key).await),
            Backend::Redis(redis) => {
                redis
                    .run("get", |mut conn| async move {
                        let value: Option<Vec<u8>> = conn.get(&key).await?;
                        Ok(value)
                    })
                    .await
            }
        }
    }

    /// Set a value, overwriting any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend is unreachable or fails.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError> {
        self.write(key, value, ttl, WriteMode::Overwrite).await.map(|_| ())
    }

    /// Set a value that the in-memory backend may drop, before expiry, to
    /// make room for other writes. Redis applies its own eviction policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend is unreachable or fails.
    pub async fn set_evictable(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError> {
        self.write(key, value, ttl, WriteMode::Evictable).await.map(|_| ())
    }

    /// Set a value only if the key is absent, atomically.
    ///
    /// Returns `true` when this call created the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend is unreachable or fails.
    pub async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, PlatformError> {
        self.write(key, value, ttl, WriteMode::IfAbsent).await
    }

    /// Check whether a live entry exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend is unreachable or fails.
    pub async fn exists(&self, key: &str) -> Result<bool, PlatformError> {
        let key = self.namespaced_key(key);
        match &self.backend {
            Backend::Memory(memory) => Ok(memory.exists(&key).await),
            Backend::Redis(redis) => {
                redis
                    .run("exists", |mut conn| async move {
                        let found: bool = conn.exists(&key).await?;
                        Ok(found)
                    })
                    .await
            }
        }
    }

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend is unreachable or fails.
    pub async fn delete(&self, key: &str) -> Result<(), PlatformError> {
        let key = self.namespaced_key(key);
        match &self.backend {
            Backend::Memory(memory) => {
                memory.delete(&key).await;
                Ok(())
            }
            Backend::Redis(redis) => {
                redis
                    .run("delete", |mut conn| async move {
                        let _: () = conn.del(&key).await?;
                        Ok(())
                    })
                    .await
            }
        }
    }

    /// The key namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Backend label, `"redis"` or `"memory"`.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis(_) => "redis",
        }
    }

    async fn write(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        mode: WriteMode,
    ) -> Result<bool, PlatformError> {
        let key = self.namespaced_key(key);
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        match &self.backend {
            Backend::Memory(memory) => memory.set(key, value, ttl, mode).await,
            Backend::Redis(redis) => {
                let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                let only_if_absent = mode == WriteMode::IfAbsent;
                let operation = if only_if_absent { "set_nx" } else { "set" };
                redis
                    .run(operation, |mut conn| async move {
                        let mut cmd = redis::cmd("SET");
                        cmd.arg(&key).arg(value).arg("PX").arg(ttl_ms);
                        if only_if_absent {
                            cmd.arg("NX");
                        }
                        // NX replies nil when the key already exists.
                        let reply: Option<String> = cmd.query_async(&mut conn).await?;
                        Ok(reply.is_some())
                    })
                    .await
            }
        }
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }
}
