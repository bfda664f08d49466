//! The write-path coordinator: owns the tenant map, the admission/append
//! path, and the background flush loop. One `Ingester` per process.

use crate::common::hash::fingerprint_labels;
use crate::common::logging::{log_debug, log_error, log_notice, log_warning};
use crate::common::{Sample, Timestamp};
use crate::config::IngesterConfig;
use crate::error::{BadSample, IngestError, IngestResult};
use crate::labels::matchers::Matchers;
use crate::labels::{format_labels, Label};
use crate::metrics;
use crate::store::{ChunkStoreIface, FlushBatch};
use crate::tenant::UserState;
use ahash::RandomState;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// One sample to append, as carried by a [`WriteRequest`].
#[derive(Debug, Clone)]
pub struct WriteSample {
    pub labels: Vec<Label>,
    pub timestamp: Timestamp,
    pub value: f64,
}

/// A batch of samples submitted in one write call. Samples may belong to
/// different series (even different metrics); each is resolved and appended
/// independently.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub samples: Vec<WriteSample>,
}

/// One sample within an otherwise-accepted batch that was rejected for a
/// [`BadSample`] reason. Carries its position in the original request so a
/// caller can correlate it back.
#[derive(Debug, Clone)]
pub struct SampleRejection {
    pub index: usize,
    pub reason: BadSample,
}

/// Result of a [`Ingester::push_batch`] call that was not itself aborted by
/// an admission-limit, service-state, or cancellation error. `rejected` is
/// empty when every sample was accepted; a non-empty `rejected` is the
/// transport layer's cue to answer 400 even though the call returned `Ok`.
#[derive(Debug, Clone, Default)]
pub struct WriteResponse {
    pub rejected: Vec<SampleRejection>,
}

/// Lifecycle of an [`Ingester`]. `push`/`query` only succeed in `Running`;
/// every other state returns [`IngestError::ServiceNotRunning`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ServiceState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for ServiceState {
    fn from(value: u8) -> Self {
        match value {
            0 => ServiceState::Starting,
            1 => ServiceState::Running,
            2 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }
}

pub struct Ingester {
    config: IngesterConfig,
    store: Arc<dyn ChunkStoreIface>,
    tenants: papaya::HashMap<String, Arc<UserState>, RandomState>,
    state: AtomicU8,
    flush_handle: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    /// Batches whose `put` failed on a previous tick, re-attempted before any
    /// newly-drained batch on the next one.
    pending_retry: std::sync::Mutex<Vec<FlushBatch>>,
}

impl Ingester {
    pub fn new(config: IngesterConfig, store: Arc<dyn ChunkStoreIface>) -> IngestResult<Arc<Self>> {
        config
            .validate()
            .map_err(IngestError::Internal)?;
        Ok(Arc::new(Self {
            config,
            store,
            tenants: papaya::HashMap::default(),
            state: AtomicU8::new(ServiceState::Starting as u8),
            flush_handle: AsyncMutex::new(None),
            pending_retry: std::sync::Mutex::new(Vec::new()),
        }))
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from(self.state.load(Ordering::Acquire))
    }

    /// Moves `Starting -> Running` and spawns the periodic flush loop. A
    /// second call on an already-running ingester is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.state() == ServiceState::Running {
            return;
        }
        self.state.store(ServiceState::Running as u8, Ordering::Release);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.flush_tick_interval);
            loop {
                ticker.tick().await;
                if this.state() != ServiceState::Running {
                    break;
                }
                this.flush_tick().await;
            }
        });
        *self.flush_handle.lock().await = Some(handle);
    }

    /// Moves `Running -> Stopping -> Stopped`, running one final flush tick
    /// so no acked sample is lost to an in-flight chunk that never got
    /// handed to the store.
    pub async fn shutdown(self: &Arc<Self>) {
        self.state.store(ServiceState::Stopping as u8, Ordering::Release);
        if let Some(handle) = self.flush_handle.lock().await.take() {
            handle.abort();
        }
        self.flush_tick().await;
        self.state.store(ServiceState::Stopped as u8, Ordering::Release);
    }

    /// Appends one sample for `user_id`, via [`push_batch`](Self::push_batch)
    /// with a single-sample request and no cancellation signal. A rejected
    /// sample surfaces its [`BadSample`] reason directly rather than through
    /// `WriteResponse::rejected`, since there are no sibling samples to keep
    /// going for.
    pub fn push(&self, user_id: &str, labels: Vec<Label>, sample: Sample) -> IngestResult<()> {
        let request = WriteRequest {
            samples: vec![WriteSample {
                labels,
                timestamp: sample.timestamp,
                value: sample.value,
            }],
        };
        let response = self.push_batch(user_id, request, &CancellationToken::new())?;
        match response.rejected.into_iter().next() {
            Some(rejection) => Err(IngestError::BadSample(rejection.reason)),
            None => Ok(()),
        }
    }

    /// Appends every sample in `request` for `user_id`. `labels` within each
    /// sample need not be pre-sorted; each is sorted so its fingerprint is
    /// stable regardless of request wire order.
    ///
    /// Samples are applied in order. A [`BadSample`] rejection is recorded in
    /// the returned [`WriteResponse`] and processing continues with the next
    /// sample. Any other error (an admission-limit breach, most notably)
    /// aborts the rest of the batch immediately and is returned as `Err` —
    /// samples already applied earlier in the batch are not rolled back.
    /// `cancellation` is checked between samples; a cancelled token aborts
    /// the remainder of the batch with [`IngestError::Cancelled`].
    pub fn push_batch(
        &self,
        user_id: &str,
        request: WriteRequest,
        cancellation: &CancellationToken,
    ) -> IngestResult<WriteResponse> {
        if self.state() != ServiceState::Running {
            return Err(IngestError::ServiceNotRunning);
        }
        if user_id.is_empty() {
            return Err(IngestError::TenantMissing);
        }
        log_debug(format!(
            "push_batch: user={user_id} samples={}",
            request.samples.len()
        ));

        let user = self.get_or_create_user(user_id);
        let mut rejected = Vec::new();
        for (index, item) in request.samples.into_iter().enumerate() {
            if cancellation.is_cancelled() {
                log_warning(format!(
                    "push_batch cancelled for user {user_id} after {index} of its samples"
                ));
                return Err(IngestError::Cancelled);
            }

            let mut labels = item.labels;
            labels.sort_unstable();
            let fingerprint = fingerprint_labels(&labels);
            let sample = Sample::new(item.timestamp, item.value);
            match user.push_sample(fingerprint, &labels, sample) {
                Ok(()) => {}
                Err(IngestError::BadSample(reason)) => {
                    log_debug(format!(
                        "rejected sample {index} for user {user_id}, series {}: {reason}",
                        format_labels(&labels)
                    ));
                    rejected.push(SampleRejection { index, reason });
                }
                Err(IngestError::AdmissionLimit(reason)) => {
                    log_warning(format!(
                        "push_batch aborted for user {user_id} at sample {index}, series {}: {reason}",
                        format_labels(&labels)
                    ));
                    return Err(IngestError::AdmissionLimit(reason));
                }
                Err(other) => {
                    log_error(format!(
                        "push_batch aborted for user {user_id} at sample {index}, series {}: {other}",
                        format_labels(&labels)
                    ));
                    return Err(other);
                }
            }
        }
        Ok(WriteResponse { rejected })
    }

    /// Returns every series (and its matching samples in `[from, through]`)
    /// whose labels satisfy `matchers`. Unknown tenants return an empty
    /// result rather than an error — querying before any data has arrived
    /// is not itself a fault.
    pub fn query(
        &self,
        user_id: &str,
        matchers: &Matchers,
        from: Timestamp,
        through: Timestamp,
    ) -> IngestResult<Vec<(Vec<Label>, Vec<Sample>)>> {
        if self.state() != ServiceState::Running {
            return Err(IngestError::ServiceNotRunning);
        }
        if user_id.is_empty() {
            return Err(IngestError::TenantMissing);
        }
        let Some(user) = self.lookup_user(user_id) else {
            log_debug(format!("query: user={user_id} has no resident series yet"));
            return Ok(Vec::new());
        };
        let matches = user.series_matching(matchers);
        log_notice(format!(
            "query: user={user_id} matchers={} matched={} series",
            matchers.0.len(),
            matches.len()
        ));
        Ok(matches
            .into_iter()
            .map(|(fp, labels)| {
                let samples = user.samples_for_range(fp, &labels, from, through);
                (labels, samples)
            })
            .collect())
    }

    fn get_or_create_user(&self, user_id: &str) -> Arc<UserState> {
        let pinned = self.tenants.pin();
        let state = pinned.get_or_insert_with(user_id.to_string(), || {
            Arc::new(UserState::new(user_id, &self.config))
        });
        Arc::clone(state)
    }

    fn lookup_user(&self, user_id: &str) -> Option<Arc<UserState>> {
        let pinned = self.tenants.pin();
        pinned.get(user_id).map(Arc::clone)
    }

    /// One flush cycle: retry anything left over from a previous failed
    /// `put`, then drain every tenant's aged/closed chunks in parallel
    /// (rayon, CPU/lock-bound), then hand each resulting batch to the store
    /// sequentially. No lock is held across the `put` call. A failed `put`
    /// is logged, counted in `store_failures_total`, and kept for the next
    /// tick rather than dropped.
    async fn flush_tick(&self) {
        let pinned = self.tenants.pin();
        let users: Vec<(String, Arc<UserState>)> = pinned
            .iter()
            .map(|(user_id, state)| (user_id.clone(), Arc::clone(state)))
            .collect();
        drop(pinned);
        log_debug(format!("flush_tick: draining {} tenants", users.len()));

        let max_chunk_age = self.config.max_chunk_age;
        let drained: Vec<FlushBatch> = users
            .par_iter()
            .flat_map(|(user_id, state)| {
                state
                    .drain_flushable(max_chunk_age)
                    .into_iter()
                    .map(|(fingerprint, labels, chunks)| FlushBatch {
                        user_id: user_id.clone(),
                        fingerprint,
                        labels,
                        chunks,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let retrying = std::mem::take(&mut *self.pending_retry.lock().unwrap_or_else(|e| e.into_inner()));
        let mut failed = Vec::new();
        for batch in retrying.into_iter().chain(drained) {
            // Shutdown may have been requested mid-drain; finish handing off
            // what's already been pulled off each series rather than abandon
            // it, but stop picking up further tenant work once stopped.
            if self.state() == ServiceState::Stopped {
                failed.push(batch);
                continue;
            }
            let fingerprint = batch.fingerprint;
            let user_id = batch.user_id.clone();
            if let Err(err) = self.store.put(batch.clone()).await {
                metrics::inc_store_failures();
                log_warning(format!(
                    "chunk flush failed for user {user_id} fingerprint {fingerprint}, will retry next tick: {err}"
                ));
                failed.push(batch);
            }
        }
        *self.pending_retry.lock().unwrap_or_else(|e| e.into_inner()) = failed;

        let max_series_idle = self.config.max_series_idle;
        for (_, state) in &users {
            state.evict_idle(max_series_idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::matchers::Matcher;
    use crate::store::InMemoryChunkStore;

    fn config() -> IngesterConfig {
        IngesterConfig::builder()
            .flush_tick_interval(std::time::Duration::from_secs(3600))
            .max_chunk_age(std::time::Duration::from_millis(0))
            .build()
    }

    fn labels(metric: &str, job: &str) -> Vec<Label> {
        vec![Label::new("job", job), Label::new("__name__", metric)]
    }

    #[tokio::test]
    async fn push_before_start_is_rejected() {
        let store = Arc::new(InMemoryChunkStore::new());
        let ingester = Ingester::new(config(), store).unwrap();
        let err = ingester
            .push("tenant-a", labels("cpu", "api"), Sample::new(1, 1.0))
            .unwrap_err();
        assert!(matches!(err, IngestError::ServiceNotRunning));
    }

    #[tokio::test]
    async fn push_then_query_round_trips() {
        let store = Arc::new(InMemoryChunkStore::new());
        let ingester = Ingester::new(config(), store).unwrap();
        ingester.start().await;
        ingester
            .push("tenant-a", labels("cpu", "api"), Sample::new(1, 1.0))
            .unwrap();
        ingester
            .push("tenant-a", labels("cpu", "api"), Sample::new(2, 2.0))
            .unwrap();

        let matchers = Matchers::new(vec![Matcher::eq("__name__", "cpu")]);
        let results = ingester.query("tenant-a", &matchers, 0, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, vec![Sample::new(1, 1.0), Sample::new(2, 2.0)]);
        ingester.shutdown().await;
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = Arc::new(InMemoryChunkStore::new());
        let ingester = Ingester::new(config(), store).unwrap();
        ingester.start().await;
        ingester
            .push("tenant-a", labels("cpu", "api"), Sample::new(1, 1.0))
            .unwrap();
        ingester
            .push("tenant-b", labels("cpu", "api"), Sample::new(1, 99.0))
            .unwrap();

        let matchers = Matchers::new(vec![Matcher::eq("__name__", "cpu")]);
        let a = ingester.query("tenant-a", &matchers, 0, 10).unwrap();
        let b = ingester.query("tenant-b", &matchers, 0, 10).unwrap();
        assert_eq!(a[0].1[0].value, 1.0);
        assert_eq!(b[0].1[0].value, 99.0);
        ingester.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_outstanding_chunks_to_the_store() {
        let store = Arc::new(InMemoryChunkStore::new());
        let ingester = Ingester::new(config(), Arc::clone(&store) as Arc<dyn ChunkStoreIface>).unwrap();
        ingester.start().await;
        ingester
            .push("tenant-a", labels("cpu", "api"), Sample::new(1, 1.0))
            .unwrap();
        ingester.shutdown().await;
        assert_eq!(store.flushed_count(), 1);
    }

    #[tokio::test]
    async fn query_before_any_write_is_empty_not_an_error() {
        let store = Arc::new(InMemoryChunkStore::new());
        let ingester = Ingester::new(config(), store).unwrap();
        ingester.start().await;
        let matchers = Matchers::new(vec![Matcher::eq("__name__", "cpu")]);
        let results = ingester.query("tenant-a", &matchers, 0, 10).unwrap();
        assert!(results.is_empty());
    }

    /// Fails its first `put`, then succeeds on every subsequent call — used
    /// to exercise the flush loop's retry-next-tick path.
    #[derive(Default)]
    struct FlakyOnceStore {
        calls: std::sync::atomic::AtomicUsize,
        inner: InMemoryChunkStore,
    }

    #[async_trait::async_trait]
    impl ChunkStoreIface for FlakyOnceStore {
        async fn put(
            &self,
            batch: crate::store::FlushBatch,
        ) -> Result<(), crate::error::StoreFailure> {
            if self.calls.fetch_add(1, Ordering::Relaxed) == 0 {
                return Err(crate::error::StoreFailure("transient".to_string()));
            }
            self.inner.put(batch).await
        }
    }

    #[tokio::test]
    async fn failed_flush_is_retried_on_the_next_tick_not_dropped() {
        let store = Arc::new(FlakyOnceStore::default());
        let ingester =
            Ingester::new(config(), Arc::clone(&store) as Arc<dyn ChunkStoreIface>).unwrap();
        ingester.start().await;
        ingester
            .push("tenant-a", labels("cpu", "api"), Sample::new(1, 1.0))
            .unwrap();

        // first tick: the only store call fails, chunk must not be lost
        ingester.flush_tick().await;
        assert_eq!(store.inner.flushed_count(), 0);

        // second tick: the retained batch is retried and succeeds
        ingester.flush_tick().await;
        assert_eq!(store.inner.flushed_count(), 1);
    }
}
