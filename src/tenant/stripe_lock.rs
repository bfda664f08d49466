use std::sync::{Mutex, MutexGuard};

/// Fixed-size array of independently lockable shards, indexed by `key %
/// shard_count`. Bounds per-series lock contention to a constant number of
/// mutexes instead of one per series, at the cost of unrelated series
/// occasionally sharing a stripe.
pub struct Sharded<T> {
    shards: Vec<Mutex<T>>,
}

impl<T: Default> Sharded<T> {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(T::default())).collect(),
        }
    }
}

impl<T> Sharded<T> {
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn index(&self, key: u64) -> usize {
        (key % self.shards.len() as u64) as usize
    }

    fn lock(&self, idx: usize) -> MutexGuard<'_, T> {
        self.shards[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Locks the stripe owning `key` and runs `f` against its contents.
    pub fn with_shard<R>(&self, key: u64, f: impl FnOnce(&mut T) -> R) -> R {
        let idx = self.index(key);
        let mut guard = self.lock(idx);
        f(&mut guard)
    }

    /// Runs `f` against every shard in turn, collecting the results. Each
    /// shard is locked and released independently — no global snapshot is
    /// taken, so concurrent writers may interleave between shards.
    pub fn for_each_shard<R>(&self, mut f: impl FnMut(&mut T) -> Vec<R>) -> Vec<R> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            out.extend(f(&mut guard));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn same_key_always_maps_to_the_same_shard() {
        let sharded: Sharded<HashMap<u64, i32>> = Sharded::new(4);
        sharded.with_shard(7, |m| m.insert(7, 1));
        sharded.with_shard(7, |m| m.insert(7, 2));
        let value = sharded.with_shard(7, |m| *m.get(&7).unwrap());
        assert_eq!(value, 2);
    }

    #[test]
    fn for_each_shard_visits_entries_across_all_shards() {
        let sharded: Sharded<HashMap<u64, i32>> = Sharded::new(4);
        for key in 0..16u64 {
            sharded.with_shard(key, |m| m.insert(key, key as i32));
        }
        let mut seen = sharded.for_each_shard(|m| m.keys().copied().collect());
        seen.sort_unstable();
        assert_eq!(seen, (0..16u64).collect::<Vec<_>>());
    }
}
