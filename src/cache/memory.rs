//! In-process [`CacheBackend`] for single-instance deployments and tests.
//!
//! Values live in an LRU bounded by entry count, each with its own deadline.
//! Set-if-absent records (leases) live in a separate map outside the LRU, so
//! value churn can never evict a live lease. Deadlines use
//! `tokio::time::Instant`, so tests can drive expiry with a paused clock.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::time::Instant;

use super::backend::{BackendError, CacheBackend};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";

struct MemoryValue {
    data: Bytes,
    deadline: Instant,
}

impl MemoryValue {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn score(&self, member: &str) -> Option<i64> {
        self.scores.get(member).copied()
    }

    fn remove_if_at_most(&mut self, member: &str, max_score: i64) -> bool {
        match self.scores.get(member).copied() {
            Some(score) if score <= max_score => {
                self.scores.remove(member);
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            _ => false,
        }
    }

    fn up_to(&self, max_score: i64) -> Vec<String> {
        self.ordered
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

pub struct MemoryBackend {
    values: Mutex<LruCache<String, MemoryValue>>,
    leases: Mutex<HashMap<String, MemoryValue>>,
    sorted: Mutex<HashMap<String, SortedSet>>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            values: Mutex::new(LruCache::new(capacity)),
            leases: Mutex::new(HashMap::new()),
            sorted: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored values, including ones past their deadline that have
    /// not been touched since.
    pub fn len(&self) -> usize {
        mutex_lock(&self.values, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of members currently in a sorted set.
    pub fn sorted_len(&self, set: &str) -> usize {
        mutex_lock(&self.sorted, SOURCE, "sorted_len")
            .get(set)
            .map_or(0, |entries| entries.scores.len())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN))
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let now = Instant::now();
        let mut values = mutex_lock(&self.values, SOURCE, "get");
        match values.get(key) {
            Some(value) if value.is_live(now) => return Ok(Some(value.data.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        values.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        let deadline = Instant::now() + ttl;
        mutex_lock(&self.values, SOURCE, "set").put(
            key.to_string(),
            MemoryValue {
                data: Bytes::copy_from_slice(value),
                deadline,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, BackendError> {
        let now = Instant::now();
        let mut leases = mutex_lock(&self.leases, SOURCE, "set_nx");
        leases.retain(|_, existing| existing.is_live(now));
        if leases.contains_key(key) {
            return Ok(false);
        }
        leases.insert(
            key.to_string(),
            MemoryValue {
                data: Bytes::copy_from_slice(value),
                deadline: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, BackendError> {
        let now = Instant::now();
        let mut leases = mutex_lock(&self.leases, SOURCE, "delete_if_equals");
        let matches = leases
            .get(key)
            .is_some_and(|existing| existing.is_live(now) && existing.data.as_ref() == expected);
        if matches {
            leases.remove(key);
        }
        Ok(matches)
    }

    async fn sorted_add(&self, set: &str, member: &str, score: i64) -> Result<(), BackendError> {
        mutex_lock(&self.sorted, SOURCE, "sorted_add")
            .entry(set.to_string())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    async fn sorted_range_up_to(
        &self,
        set: &str,
        max_score: i64,
    ) -> Result<Vec<String>, BackendError> {
        Ok(mutex_lock(&self.sorted, SOURCE, "sorted_range_up_to")
            .get(set)
            .map(|entries| entries.up_to(max_score))
            .unwrap_or_default())
    }

    async fn sorted_score(&self, set: &str, member: &str) -> Result<Option<i64>, BackendError> {
        Ok(mutex_lock(&self.sorted, SOURCE, "sorted_score")
            .get(set)
            .and_then(|entries| entries.score(member)))
    }

    async fn sorted_remove_if_score_at_most(
        &self,
        set: &str,
        member: &str,
        max_score: i64,
    ) -> Result<bool, BackendError> {
        Ok(mutex_lock(&self.sorted, SOURCE, "sorted_remove_if_score_at_most")
            .get_mut(set)
            .is_some_and(|entries| entries.remove_if_at_most(member, max_score)))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
