//! Ranking cache with single-flight rebuilds.
//!
//! Values are stored as a JSON envelope `{generation, payload}`. Every
//! invalidation bumps the generation of the affected scope, so an entry
//! written by a rebuild that raced an invalidation is ignored on read and a
//! rebuild only writes back if its scope generation is unchanged.
//!
//! Concurrent misses for one key share a single rebuild task. The task keeps
//! running after every waiter gives up, for at most
//! [`REBUILD_TASK_TIMEOUT_FACTOR`] times the per-caller timeout, and always
//! removes itself from the in-flight table when it ends.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use trendpulse_core::{EntityId, EntityKind};

use crate::error::CacheError;
use crate::query::SortOrder;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Removes every key starting with `prefix`; returns how many.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

/// Bounded in-process backend. When full, expired entries go first, then
/// the entry closest to expiry.
#[derive(Debug)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    max_entries: usize,
    available: AtomicBool,
}

impl MemoryCacheBackend {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates a backend outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Backend("memory cache unavailable".to_string()))
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, (_, expires_at)| *expires_at > now);
            if entries.len() >= self.max_entries {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, (_, expires_at))| *expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

/// Invalidation unit a cache key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    Kind(EntityKind),
    Entity(EntityId),
}

#[must_use]
pub fn list_key(kind: EntityKind, sort: SortOrder, page: usize) -> String {
    format!("{kind}:{sort}:{page}")
}

#[must_use]
pub fn entity_key(entity_id: EntityId) -> String {
    entity_id.to_string()
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    generation: u64,
    payload: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct EnvelopeIn<T> {
    generation: u64,
    payload: T,
}

/// How many per-caller timeouts a rebuild task may run before it is abandoned.
pub const REBUILD_TASK_TIMEOUT_FACTOR: u32 = 10;

type Rebuild = Shared<BoxFuture<'static, Result<Arc<String>, CacheError>>>;

struct Inner {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    rebuild_timeout: Duration,
    generations: Mutex<HashMap<CacheScope, u64>>,
    in_flight: Mutex<HashMap<String, Rebuild>>,
    rebuilds: AtomicUsize,
}

impl Inner {
    async fn generation(&self, scope: CacheScope) -> u64 {
        self.generations
            .lock()
            .await
            .get(&scope)
            .copied()
            .unwrap_or(0)
    }

    /// Cached payload for `key` if present and written under `generation`.
    async fn lookup<T: DeserializeOwned>(
        &self,
        key: &str,
        generation: u64,
    ) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<EnvelopeIn<T>>(&raw) {
            Ok(envelope) if envelope.generation == generation => Ok(Some(envelope.payload)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache: undecodable entry, treating as miss");
                Ok(None)
            }
        }
    }
}

/// Read-through cache for ranked pages and single-entity snapshots.
#[derive(Clone)]
pub struct RankingCache {
    inner: Arc<Inner>,
}

impl RankingCache {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, rebuild_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                ttl,
                rebuild_timeout,
                generations: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                rebuilds: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of rebuilds started since construction.
    #[must_use]
    pub fn rebuild_count(&self) -> usize {
        self.inner.rebuilds.load(Ordering::SeqCst)
    }

    /// Returns the cached value for `key`, or runs `rebuild` once for all
    /// concurrent callers missing the same key.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Backend`] if the backend read fails.
    /// - [`CacheError::RebuildTimeout`] if the shared rebuild outlives the
    ///   configured timeout for this caller.
    /// - [`CacheError::RebuildFailed`] / [`CacheError::Codec`] from the rebuild.
    pub async fn get_or_rebuild<T, F, Fut>(
        &self,
        key: String,
        scope: CacheScope,
        rebuild: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let generation = self.inner.generation(scope).await;
        if let Some(hit) = self.inner.lookup(&key, generation).await? {
            return Ok(hit);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(running) = in_flight.get(&key) {
                running.clone()
            } else {
                // A rebuild may have finished between the first lookup and
                // taking the lock.
                if let Some(hit) = self.inner.lookup(&key, generation).await? {
                    return Ok(hit);
                }
                let shared = self.spawn_rebuild(key.clone(), scope, generation, rebuild());
                in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        let payload = tokio::time::timeout(self.inner.rebuild_timeout, shared)
            .await
            .map_err(|_| CacheError::RebuildTimeout { key: key.clone() })??;

        serde_json::from_str(&payload).map_err(|e| CacheError::Codec(e.to_string()))
    }

    fn spawn_rebuild<T, Fut>(
        &self,
        key: String,
        scope: CacheScope,
        generation: u64,
        rebuild: Fut,
    ) -> Rebuild
    where
        T: Serialize + Send + 'static,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        inner.rebuilds.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(key, "cache: rebuilding");

        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let budget = inner
                .rebuild_timeout
                .saturating_mul(REBUILD_TASK_TIMEOUT_FACTOR);
            let result = tokio::time::timeout(
                budget,
                rebuild_and_store(&inner, &task_key, scope, generation, rebuild),
            )
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(key = %task_key, ?budget, "cache: rebuild abandoned");
                Err(CacheError::RebuildTimeout {
                    key: task_key.clone(),
                })
            });
            inner.in_flight.lock().await.remove(&task_key);
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(CacheError::RebuildFailed {
                    key,
                    reason: e.to_string(),
                }),
            }
        }
        .boxed()
        .shared()
    }

    /// Bumps the generations of `entity_id` and its kind and drops their keys.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if a delete fails. The generation bump
    /// has already happened by then, so stale entries are still never served.
    pub async fn invalidate_entity(
        &self,
        entity_id: EntityId,
        kind: EntityKind,
    ) -> Result<(), CacheError> {
        {
            let mut generations = self.inner.generations.lock().await;
            for scope in [CacheScope::Kind(kind), CacheScope::Entity(entity_id)] {
                *generations.entry(scope).or_insert(0) += 1;
            }
        }
        self.inner.backend.delete(&entity_key(entity_id)).await?;
        self.inner.backend.delete_prefix(&format!("{kind}:")).await?;
        Ok(())
    }
}

async fn rebuild_and_store<T, Fut>(
    inner: &Inner,
    key: &str,
    scope: CacheScope,
    generation: u64,
    rebuild: Fut,
) -> Result<Arc<String>, CacheError>
where
    T: Serialize,
    Fut: Future<Output = Result<T, CacheError>>,
{
    let value = rebuild.await?;
    let payload = serde_json::to_value(&value).map_err(|e| CacheError::Codec(e.to_string()))?;

    if inner.generation(scope).await == generation {
        let envelope = serde_json::to_string(&EnvelopeOut {
            generation,
            payload: &payload,
        })
        .map_err(|e| CacheError::Codec(e.to_string()))?;
        if let Err(e) = inner.backend.set(key, envelope, inner.ttl).await {
            tracing::warn!(key, error = %e, "cache: write-back failed");
        }
    } else {
        tracing::debug!(key, "cache: scope invalidated during rebuild, not storing");
    }

    Ok(Arc::new(payload.to_string()))
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
