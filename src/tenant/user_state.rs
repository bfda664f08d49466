use crate::chunk::ChunkDesc;
use crate::common::time::current_time_millis;
use crate::common::{Sample, Timestamp};
use crate::config::IngesterConfig;
use crate::error::{AdmissionLimit, IngestError, IngestResult};
use crate::labels::matchers::Matchers;
use crate::labels::Label;
use crate::metrics;
use crate::series::MemorySeries;
use crate::tenant::stripe_lock::Sharded;
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// `label_index` key: a single `(name, value)` pair.
type LabelKey = (String, String);

/// Series sharing a fingerprint. Almost always length 1 — this only grows
/// past one element on an actual 64-bit hash collision between distinct
/// label sets.
type FingerprintBucket = SmallVec<MemorySeries, 1>;

/// Per-tenant in-memory index: the fingerprint-keyed series map (striped
/// across `stripe_count` shards), the label postings index used to serve
/// equality-matcher lookups without a full scan, and the cardinality
/// bookkeeping needed to enforce `max_series_per_user`/`max_series_per_metric`.
///
/// Lock ordering: a shard's stripe lock is always acquired before
/// `metric_counts` or `label_index`; `label_index` and `metric_counts` are
/// never held at the same time as each other. Series mutation that doesn't
/// create or remove a series (the common case) never touches either.
pub struct UserState {
    pub user_id: String,
    shards: Sharded<AHashMap<u64, FingerprintBucket>>,
    metric_counts: Mutex<AHashMap<String, usize>>,
    label_index: Mutex<AHashMap<LabelKey, AHashSet<u64>>>,
    series_count: AtomicUsize,
    last_access_millis: AtomicI64,
    max_series_per_user: usize,
    max_series_per_metric: usize,
    chunk_capacity: usize,
}

impl UserState {
    pub fn new(user_id: impl Into<String>, config: &IngesterConfig) -> Self {
        Self {
            user_id: user_id.into(),
            shards: Sharded::new(config.stripe_count),
            metric_counts: Mutex::new(AHashMap::new()),
            label_index: Mutex::new(AHashMap::new()),
            series_count: AtomicUsize::new(0),
            last_access_millis: AtomicI64::new(current_time_millis()),
            max_series_per_user: config.max_series_per_user,
            max_series_per_metric: config.max_series_per_metric,
            chunk_capacity: config.chunk_capacity,
        }
    }

    pub fn series_count(&self) -> usize {
        self.series_count.load(Ordering::Relaxed)
    }

    pub fn idle_millis(&self) -> i64 {
        current_time_millis() - self.last_access_millis.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_access_millis
            .store(current_time_millis(), Ordering::Relaxed);
    }

    /// Appends `sample` to the series identified by `(fingerprint, labels)`,
    /// creating it on first write. Enforces admission limits only on the
    /// creation path — an existing series never fails admission. A
    /// fingerprint collision (same `fingerprint`, different `labels`) is
    /// resolved by label-set equality within the bucket.
    pub fn push_sample(
        &self,
        fingerprint: u64,
        labels: &[Label],
        sample: Sample,
    ) -> IngestResult<()> {
        self.touch();
        let metric_name = crate::labels::metric_name_of(labels).unwrap_or("").to_string();
        let chunk_capacity = self.chunk_capacity;

        self.shards.with_shard(fingerprint, |shard| {
            let bucket = shard.entry(fingerprint).or_default();
            if let Some(series) = bucket.iter_mut().find(|s| s.labels.as_slice() == labels) {
                return series.add(sample);
            }

            self.admit_new_series(&metric_name)?;
            let mut series = MemorySeries::new(labels.to_vec(), fingerprint, chunk_capacity);
            let result = series.add(sample);
            if result.is_ok() {
                self.index_series(fingerprint, &series.labels);
                bucket.push(series);
                self.series_count.fetch_add(1, Ordering::Relaxed);
            } else {
                self.release_admission(&metric_name);
            }
            result
        })
    }

    /// Adds `fingerprint` to the postings set for every `(name, value)` pair
    /// in `labels` (invariant I6: every series is indexed under each of its
    /// labels).
    fn index_series(&self, fingerprint: u64, labels: &[Label]) {
        let mut index = self.label_index.lock().unwrap_or_else(|e| e.into_inner());
        for label in labels {
            index
                .entry((label.name.clone(), label.value.clone()))
                .or_default()
                .insert(fingerprint);
        }
    }

    /// Removes `fingerprint` from the postings set of every `(name, value)`
    /// pair in `labels`, dropping any posting set left empty.
    fn unindex_series(&self, fingerprint: u64, labels: &[Label]) {
        let mut index = self.label_index.lock().unwrap_or_else(|e| e.into_inner());
        for label in labels {
            let key = (label.name.clone(), label.value.clone());
            if let Some(set) = index.get_mut(&key) {
                set.remove(&fingerprint);
                if set.is_empty() {
                    index.remove(&key);
                }
            }
        }
    }

    fn admit_new_series(&self, metric_name: &str) -> IngestResult<()> {
        if self.series_count.load(Ordering::Relaxed) >= self.max_series_per_user {
            metrics::inc_rejected_series_per_user();
            return Err(IngestError::AdmissionLimit(AdmissionLimit::TooManySeriesPerUser));
        }

        let mut counts = self.metric_counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(metric_name.to_string()).or_insert(0);
        if *count >= self.max_series_per_metric {
            metrics::inc_rejected_series_per_metric();
            return Err(IngestError::AdmissionLimit(
                AdmissionLimit::TooManySeriesPerMetric,
            ));
        }
        *count += 1;
        Ok(())
    }

    fn release_admission(&self, metric_name: &str) {
        let mut counts = self.metric_counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(metric_name) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn samples_for_range(
        &self,
        fingerprint: u64,
        labels: &[Label],
        from: Timestamp,
        through: Timestamp,
    ) -> Vec<Sample> {
        self.touch();
        self.shards.with_shard(fingerprint, |shard| {
            shard
                .get(&fingerprint)
                .and_then(|bucket| bucket.iter().find(|s| s.labels.as_slice() == labels))
                .map(|series| series.samples_for_range(from, through))
                .unwrap_or_default()
        })
    }

    /// Returns the fingerprint and label set of every resident series
    /// matching `matchers`. When `matchers` carries at least one equality
    /// matcher, intersects the label-index postings for those matchers to
    /// narrow to a fingerprint candidate set before checking the full
    /// matcher set against just those series; otherwise (e.g. a
    /// regex-or-negation-only query) falls back to a full tenant scan, since
    /// no matcher can be served by the index.
    pub fn series_matching(&self, matchers: &Matchers) -> Vec<(u64, Vec<Label>)> {
        self.touch();
        let mut equality = matchers.equality_matchers();
        let Some(first) = equality.next() else {
            return self.full_scan(matchers);
        };

        let index = self.label_index.lock().unwrap_or_else(|e| e.into_inner());
        let mut candidates = index
            .get(&(first.name.clone(), first.value.clone()))
            .cloned()
            .unwrap_or_default();
        for matcher in equality {
            let set = index.get(&(matcher.name.clone(), matcher.value.clone()));
            candidates = match set {
                Some(set) => candidates.intersection(set).copied().collect(),
                None => AHashSet::default(),
            };
            if candidates.is_empty() {
                break;
            }
        }
        drop(index);

        candidates
            .into_iter()
            .flat_map(|fp| {
                self.shards.with_shard(fp, |shard| {
                    shard
                        .get(&fp)
                        .map(|bucket| {
                            bucket
                                .iter()
                                .filter(|series| matchers.matches(&series.labels))
                                .map(|series| (fp, series.labels.clone()))
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default()
                })
            })
            .collect()
    }

    fn full_scan(&self, matchers: &Matchers) -> Vec<(u64, Vec<Label>)> {
        self.shards.for_each_shard(|shard| {
            shard
                .iter()
                .flat_map(|(fp, bucket)| bucket.iter().map(move |series| (*fp, series)))
                .filter(|(_, series)| matchers.matches(&series.labels))
                .map(|(fp, series)| (fp, series.labels.clone()))
                .collect()
        })
    }

    /// Drains closed-and-aged chunks from every series, for the flush loop.
    /// Series left with zero chunks are not removed here — idle eviction is
    /// a separate pass so a series with no data yet isn't mistaken for one
    /// that has none left after a flush.
    pub fn drain_flushable(
        &self,
        max_chunk_age: std::time::Duration,
    ) -> Vec<(u64, Vec<Label>, Vec<ChunkDesc>)> {
        self.shards.for_each_shard(|shard| {
            shard
                .values_mut()
                .flat_map(|bucket| bucket.iter_mut())
                .filter_map(|series| {
                    let descs = series.take_flushable(max_chunk_age);
                    if descs.is_empty() {
                        None
                    } else {
                        Some((series.fingerprint, series.labels.clone(), descs))
                    }
                })
                .collect()
        })
    }

    /// Removes series that carry no resident chunks (already flushed) and
    /// have had no write attempt in `max_series_idle`. Returns the number
    /// evicted.
    pub fn evict_idle(&self, max_series_idle: std::time::Duration) -> usize {
        let idle_ms = max_series_idle.as_millis() as i64;
        let removed: Vec<(String, u64, Vec<Label>)> = self.shards.for_each_shard(|shard| {
            let mut removed = Vec::new();
            shard.retain(|fp, bucket| {
                bucket.retain(|series| {
                    let stale = series.is_empty() && series.idle_millis() >= idle_ms;
                    if stale {
                        removed.push((
                            series.metric_name().unwrap_or("").to_string(),
                            *fp,
                            series.labels.clone(),
                        ));
                    }
                    !stale
                });
                !bucket.is_empty()
            });
            removed
        });

        if !removed.is_empty() {
            let mut counts = self.metric_counts.lock().unwrap_or_else(|e| e.into_inner());
            for (name, _, _) in &removed {
                if let Some(count) = counts.get_mut(name) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        for (_, fingerprint, labels) in &removed {
            self.unindex_series(*fingerprint, labels);
        }

        self.series_count.fetch_sub(removed.len(), Ordering::Relaxed);
        removed.len()
    }
}
