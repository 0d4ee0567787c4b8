//! Result cache (spec §4.8): content-addressed, in-memory, single-flight.
//!
//! Grounded in the teacher's own concurrency idioms (`futures::FutureExt`
//! used throughout `drivers/mod.rs`/`drivers/openai.rs`) generalized to a
//! `Shared` future per in-flight key, the pattern the spec's Design Notes
//! ask for: "a map of key -> future/promise... waiters woken en masse on
//! completion."

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::Utc;
use futures::future::{FutureExt, Shared};

use crate::{
    errors::PipelineError,
    model::{CacheEntry, CacheKey, ImprovementResult},
};

type SharedCompute = Shared<
    std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<ImprovementResult, CacheComputeError>> + Send>,
    >,
>;

/// `PipelineError` isn't `Clone` (it wraps non-`Clone` data in some
/// variants' metadata), but a `Shared` future's output must be `Clone` so
/// every waiter can receive it. We store the display string instead and
/// reconstitute a `PipelineError::Internal`-shaped error for waiters that
/// didn't originate the call.
#[derive(Debug, Clone)]
pub struct CacheComputeError(pub String);

impl From<CacheComputeError> for PipelineError {
    fn from(err: CacheComputeError) -> Self {
        PipelineError::ConnectionError(err.0)
    }
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, SharedCompute>,
}

/// Optional eviction policy: an LRU size cap and/or a TTL. Eviction is
/// opportunistic (checked on `put`) and never blocks `get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicy {
    pub max_entries: Option<usize>,
    pub ttl: Option<Duration>,
}

pub struct ResultCache {
    inner: Arc<Mutex<Inner>>,
    policy: EvictionPolicy,
}

impl ResultCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
            policy,
        }
    }

    /// Return the cached result for `key`, if present.
    pub fn get(&self, key: &CacheKey) -> Option<ImprovementResult> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.get(key).map(|entry| entry.result.clone())
    }

    /// Insert or overwrite the result for `key`.
    pub fn put(&self, key: CacheKey, result: ImprovementResult) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Utc::now(),
            },
        );
        self.evict_if_needed(&mut inner);
    }

    /// Get-or-compute with single-flight: if `key` is already in flight, wait
    /// for the outstanding compute rather than launching a second one. The
    /// `compute` closure is only ever invoked by the caller that wins the
    /// race to register the in-flight slot.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<ImprovementResult, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<ImprovementResult, PipelineError>> + Send + 'static,
    {
        if let Some(cached) = self.get(&key) {
            return Ok(cached);
        }

        let shared_future = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");

            if let Some(existing) = inner.in_flight.get(&key) {
                existing.clone()
            } else {
                let boxed: std::pin::Pin<
                    Box<dyn std::future::Future<Output = Result<ImprovementResult, CacheComputeError>> + Send>,
                > = Box::pin(async move { compute().await.map_err(|e| CacheComputeError(e.to_string())) });
                let shared = boxed.shared();
                inner.in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        let outcome = shared_future.await;

        {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            inner.in_flight.remove(&key);
            if let Ok(ref result) = outcome {
                inner.entries.insert(
                    key,
                    CacheEntry {
                        result: result.clone(),
                        inserted_at: Utc::now(),
                    },
                );
                self.evict_if_needed(&mut inner);
            }
        }

        outcome.map_err(PipelineError::from)
    }

    fn evict_if_needed(&self, inner: &mut Inner) {
        if let Some(ttl) = self.policy.ttl {
            let now = Utc::now();
            inner.entries.retain(|_, entry| {
                let age = now.signed_duration_since(entry.inserted_at);
                age.to_std().map(|age| age < ttl).unwrap_or(true)
            });
        }

        if let Some(max_entries) = self.policy.max_entries {
            while inner.entries.len() > max_entries {
                let oldest_key = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone());
                match oldest_key {
                    Some(key) => {
                        inner.entries.remove(&key);
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionMode, Preset};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_result(prompt: &str) -> ImprovementResult {
        ImprovementResult {
            improved_prompt: prompt.to_owned(),
            clarifying_questions: vec![],
            assumptions: vec![],
            confidence: 0.8,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_get_returns_none_before_put() {
        let cache = ResultCache::new(EvictionPolicy::default());
        let key = CacheKey::compute("idea", None, ExecutionMode::Remote, Preset::Default, "m");
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let cache = ResultCache::new(EvictionPolicy::default());
        let key = CacheKey::compute("idea", None, ExecutionMode::Remote, Preset::Default, "m");
        cache.put(key.clone(), sample_result("hello"));
        assert_eq!(cache.get(&key).unwrap().improved_prompt, "hello");
    }

    #[tokio::test]
    async fn test_single_flight_only_computes_once() {
        let cache = Arc::new(ResultCache::new(EvictionPolicy::default()));
        let key = CacheKey::compute("idea", None, ExecutionMode::Remote, Preset::Default, "m");
        let call_count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let key = key.clone();
            let call_count = call_count.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key, move || async move {
                        call_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(sample_result("computed"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.improved_prompt, "computed");
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_eviction() {
        let cache = ResultCache::new(EvictionPolicy {
            max_entries: None,
            ttl: Some(Duration::from_millis(1)),
        });
        let key = CacheKey::compute("idea", None, ExecutionMode::Remote, Preset::Default, "m");
        cache.put(key.clone(), sample_result("will expire"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        // A second `put` triggers opportunistic eviction.
        let other_key = CacheKey::compute("idea2", None, ExecutionMode::Remote, Preset::Default, "m");
        cache.put(other_key, sample_result("fresh"));
        assert!(cache.get(&key).is_none());
    }
}
