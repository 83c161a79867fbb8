use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

/// Cached read responses, keyed by the entity they describe.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum CacheKey {
    Overview,
    History {
        employee_id: u64,
        page: u32,
        limit: u32,
    },
    Preview {
        employee_id: u64,
        month: u8,
        year: u16,
    },
}

impl CacheKey {
    fn employee_id(&self) -> Option<u64> {
        match self {
            CacheKey::Overview => None,
            CacheKey::History { employee_id, .. } | CacheKey::Preview { employee_id, .. } => {
                Some(*employee_id)
            }
        }
    }
}

/// Invalidation counters. `None` is the company-wide overview scope.
#[derive(Default)]
struct Epochs {
    generation: AtomicU64,
    scopes: Mutex<HashMap<Option<u64>, u64>>,
}

impl Epochs {
    fn current(&self, scope: Option<u64>) -> u64 {
        let scoped = self
            .scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .copied()
            .unwrap_or(0);
        self.generation.load(Ordering::Acquire) + scoped
    }

    fn bump(&self, scopes: &[Option<u64>]) {
        let mut map = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        for scope in scopes {
            *map.entry(*scope).or_insert(0) += 1;
        }
    }

    fn bump_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Read-through cache for advance overview, ledger pages and salary previews.
///
/// Entries are stored under the epoch their load started in. Mutations call
/// [`ReadCache::invalidate_employee`] after commit, which moves the epoch on,
/// so a load that raced the write can only land under a key no later reader
/// asks for.
#[derive(Clone)]
pub struct ReadCache {
    inner: Cache<(CacheKey, u64), Value>,
    epochs: Arc<Epochs>,
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
            epochs: Arc::new(Epochs::default()),
        }
    }

    /// Concurrent misses for the same key share one load; errors are not cached.
    pub async fn get_or_try_load<F>(&self, key: CacheKey, load: F) -> ApiResult<Value>
    where
        F: Future<Output = ApiResult<Value>>,
    {
        let epoch = self.epochs.current(key.employee_id());
        self.inner
            .try_get_with((key, epoch), load)
            .await
            .map_err(|e: Arc<ApiError>| (*e).clone())
    }

    /// Moves the overview and every entry of `employee_id` to a new epoch,
    /// then drops what was cached under the old one.
    pub fn invalidate_employee(&self, employee_id: u64) {
        self.epochs.bump(&[None, Some(employee_id)]);

        if let Err(e) = self.inner.invalidate_entries_if(move |(key, _), _| {
            matches!(key, CacheKey::Overview) || key.employee_id() == Some(employee_id)
        }) {
            tracing::warn!(error = %e, employee_id, "Keyed invalidation failed, clearing cache");
            self.inner.invalidate_all();
        }
    }

    pub fn invalidate_all(&self) {
        self.epochs.bump_all();
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history(employee_id: u64) -> CacheKey {
        CacheKey::History {
            employee_id,
            page: 1,
            limit: 10,
        }
    }

    #[actix_web::test]
    async fn hit_skips_the_loader() {
        let cache = ReadCache::new(Duration::from_secs(60));
        let first = cache
            .get_or_try_load(CacheKey::Overview, async { Ok(json!({"v": 1})) })
            .await
            .unwrap();
        let second = cache
            .get_or_try_load(CacheKey::Overview, async { Ok(json!({"v": 2})) })
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[actix_web::test]
    async fn failed_load_is_not_cached() {
        let cache = ReadCache::new(Duration::from_secs(60));
        let err = cache
            .get_or_try_load(history(1), async { Err(ApiError::not_found("Employee not found")) })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::not_found("Employee not found"));

        let ok = cache
            .get_or_try_load(history(1), async { Ok(json!({"rows": []})) })
            .await
            .unwrap();
        assert_eq!(ok, json!({"rows": []}));
    }

    #[actix_web::test]
    async fn invalidation_is_scoped_to_one_employee() {
        let cache = ReadCache::new(Duration::from_secs(60));
        for key in [CacheKey::Overview, history(1), history(2)] {
            cache.get_or_try_load(key, async { Ok(json!("old")) }).await.unwrap();
        }

        cache.invalidate_employee(1);
        cache.inner.run_pending_tasks().await;

        let cache = &cache;
        let reload = move |key| cache.get_or_try_load(key, async { Ok(json!("new")) });
        assert_eq!(reload(history(1)).await.unwrap(), json!("new"));
        assert_eq!(reload(CacheKey::Overview).await.unwrap(), json!("new"));
        assert_eq!(reload(history(2)).await.unwrap(), json!("old"));
    }

    #[actix_web::test]
    async fn load_that_races_a_write_is_not_served_afterwards() {
        let cache = ReadCache::new(Duration::from_secs(60));
        let (release, blocked) = futures::channel::oneshot::channel::<()>();

        let slow_read = cache.get_or_try_load(history(1), async move {
            blocked.await.ok();
            Ok(json!("stale balance"))
        });
        let write = async {
            cache.invalidate_employee(1);
            release.send(()).ok();
        };
        let (raced, ()) = futures::join!(slow_read, write);
        assert_eq!(raced.unwrap(), json!("stale balance"));

        let next = cache
            .get_or_try_load(history(1), async { Ok(json!("fresh balance")) })
            .await
            .unwrap();
        assert_eq!(next, json!("fresh balance"));
    }

    #[actix_web::test]
    async fn clearing_everything_refreshes_every_scope() {
        let cache = ReadCache::new(Duration::from_secs(60));
        cache.get_or_try_load(history(2), async { Ok(json!("old")) }).await.unwrap();

        cache.invalidate_all();

        let reloaded = cache
            .get_or_try_load(history(2), async { Ok(json!("new")) })
            .await
            .unwrap();
        assert_eq!(reloaded, json!("new"));
    }
}
