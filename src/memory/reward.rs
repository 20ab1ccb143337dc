use std::collections::HashMap;
use std::sync::Mutex;

/// Process-global, non-durable reward cache: rewards observed for a key
/// since this process started, keyed by the memory key alone and scoped
/// across namespaces — callers that reuse the same key in different
/// namespaces share one reward history.
///
/// Aggregates are **since-process-start**: restarting the process resets the
/// cache even though the last-computed `avg_reward`/`reward_count` remain in
/// the store's persisted metadata as a stale snapshot.
#[derive(Default)]
pub struct RewardCache {
    inner: Mutex<HashMap<String, Vec<f64>>>,
}

impl RewardCache {
    pub fn push(&self, key: &str, reward: f64) {
        self.inner.lock().expect("reward cache poisoned").entry(key.to_string()).or_default().push(reward);
    }

    /// `(avg_reward, reward_count)` over everything observed for `key` so
    /// far this process, or `None` if nothing has been recorded.
    pub fn stats(&self, key: &str) -> Option<(f64, usize)> {
        let guard = self.inner.lock().expect("reward cache poisoned");
        let rewards = guard.get(key)?;
        if rewards.is_empty() {
            return None;
        }
        let sum: f64 = rewards.iter().sum();
        Some((sum / rewards.len() as f64, rewards.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_across_pushes() {
        let cache = RewardCache::default();
        cache.push("k", 0.5);
        cache.push("k", 0.25);
        let (avg, count) = cache.stats("k").unwrap();
        assert_eq!(avg, 0.375);
        assert_eq!(count, 2);
    }

    #[test]
    fn unknown_key_has_no_stats() {
        let cache = RewardCache::default();
        assert!(cache.stats("missing").is_none());
    }
}
