use crate::cache::ProfileCache;
use crate::fetchers::ProfileFetcher;
use common::polymarket::FetchError;
use common::types::{PeriodMetrics, ProfileStatus, TimePeriod, TraderRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Max upstream fetches per resolution pass, bounding request fan-out both
/// for the initial pass and for every poll tick.
const POLL_ADDRESS_CAP: usize = 50;

/// How settled a batch entry is. Anything but `Final` is revisited by the
/// poll loop until it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completeness {
    /// Fully enriched (cache-backed or fresh fetch). The poll loop skips it.
    Final,
    /// Synthesized from a leaderboard row only; awaiting full enrichment.
    Provisional,
    /// Error fallback sentinel; rendered but retried.
    Unknown,
}

struct BatchEntry {
    metrics: PeriodMetrics,
    completeness: Completeness,
}

struct BatchState {
    period: TimePeriod,
    /// Requested addresses in request order (lowercase, deduplicated).
    addresses: Vec<String>,
    entries: HashMap<String, BatchEntry>,
}

impl BatchState {
    /// Last-write-wins; the whole record is replaced atomically.
    fn merge_final(&mut self, address: &str, metrics: PeriodMetrics) {
        self.entries.insert(
            address.to_string(),
            BatchEntry {
                metrics,
                completeness: Completeness::Final,
            },
        );
    }

    /// Seeds and sentinels never displace anything already present.
    fn merge_if_vacant(&mut self, address: &str, metrics: PeriodMetrics, c: Completeness) {
        self.entries.entry(address.to_string()).or_insert(BatchEntry {
            metrics,
            completeness: c,
        });
    }

    fn unresolved(&self) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|a| {
                self.entries
                    .get(*a)
                    .is_none_or(|e| e.completeness != Completeness::Final)
            })
            .cloned()
            .collect()
    }
}

/// Caller-visible handle to one (addresses, period) resolution cycle.
#[derive(Clone)]
pub struct Batch {
    inner: Arc<Mutex<BatchState>>,
}

impl Batch {
    fn new(period: TimePeriod, addresses: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BatchState {
                period,
                addresses,
                entries: HashMap::new(),
            })),
        }
    }

    pub async fn period(&self) -> TimePeriod {
        self.inner.lock().await.period
    }

    /// The current caller-visible mapping. Addresses still pending upstream
    /// are absent; error fallbacks and provisional seeds are present.
    pub async fn snapshot(&self) -> HashMap<String, PeriodMetrics> {
        let state = self.inner.lock().await;
        state
            .entries
            .iter()
            .map(|(addr, e)| (addr.clone(), e.metrics.clone()))
            .collect()
    }

    /// Addresses still lacking a finalized result, in request order.
    pub async fn unresolved(&self) -> Vec<String> {
        self.inner.lock().await.unresolved()
    }

    pub async fn is_complete(&self) -> bool {
        self.inner.lock().await.unresolved().is_empty()
    }
}

/// Handle to a running background poll task.
pub struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Cancel the repeating timer. The in-flight tick, if any, completes and
    /// its results are merged into the (about to be discarded) batch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Drives client-visible data completeness for a set of addresses under one
/// time period: bulk cache check, per-address fetch for misses with
/// write-through, and a background poll loop that keeps retrying anything
/// unsettled. Individual failures degrade to sentinels; nothing here is
/// fatal to a batch.
pub struct Enrichment<F> {
    cache: Arc<ProfileCache>,
    fetcher: Arc<F>,
    poll_interval: Duration,
}

impl<F: ProfileFetcher + Send + Sync + 'static> Enrichment<F> {
    pub fn new(cache: Arc<ProfileCache>, fetcher: Arc<F>, poll_interval: Duration) -> Self {
        Self {
            cache,
            fetcher,
            poll_interval,
        }
    }

    /// One resolution cycle: bulk cache read, split into resolved/missing,
    /// then a bounded fetch pass over the misses. Returns as soon as that
    /// pass finishes; stragglers are left for the poll loop.
    ///
    /// For the all-time period, `seed` rows synthesize provisional metrics
    /// so the first paint is immediate; the poll loop keeps retrying those
    /// until a full profile replaces them.
    pub async fn resolve_batch(
        &self,
        addresses: &[String],
        period: TimePeriod,
        seed: &[TraderRecord],
    ) -> Batch {
        let mut seen = std::collections::HashSet::new();
        let normalized: Vec<String> = addresses
            .iter()
            .map(|a| a.to_lowercase())
            .filter(|a| seen.insert(a.clone()))
            .collect();

        let batch = Batch::new(period, normalized.clone());

        if period == TimePeriod::All {
            let mut state = batch.inner.lock().await;
            for rec in seed {
                let addr = rec.address.to_lowercase();
                if seen.contains(&addr) {
                    state.merge_if_vacant(
                        &addr,
                        PeriodMetrics::from_leaderboard(rec),
                        Completeness::Provisional,
                    );
                }
            }
        }

        self.resolve_pass(&batch, normalized).await;
        batch
    }

    /// One pass over `candidates`: bulk cache check first, then at most
    /// `POLL_ADDRESS_CAP` upstream fetches for the remaining misses.
    async fn resolve_pass(&self, batch: &Batch, candidates: Vec<String>) {
        if candidates.is_empty() {
            return;
        }
        let period = batch.period().await;

        let lookups = match self.cache.bulk_lookup(&candidates, period).await {
            Ok(lookups) => lookups,
            Err(e) => {
                warn!(error = %e, "bulk cache lookup failed, treating all as misses");
                HashMap::new()
            }
        };

        let mut missing = Vec::new();
        {
            let mut state = batch.inner.lock().await;
            for addr in candidates {
                match lookups.get(&addr).and_then(|l| l.metrics.clone()) {
                    Some(metrics) => state.merge_final(&addr, metrics),
                    None => missing.push(addr),
                }
            }
        }

        for addr in missing.into_iter().take(POLL_ADDRESS_CAP) {
            self.fetch_and_merge(batch, &addr, period).await;
        }
    }

    /// Fetch one address and merge the outcome:
    /// success → write-through and finalize; pending → leave unresolved;
    /// not-found → finalize as zeroed metrics; anything else → unknown
    /// sentinel, never cached, retried by the poll loop.
    async fn fetch_and_merge(&self, batch: &Batch, address: &str, period: TimePeriod) {
        match self.fetcher.fetch_profile(address, period).await {
            Ok(m) if m.status == ProfileStatus::Success => {
                if let Err(e) = self.cache.put(address, period, m.clone()).await {
                    warn!(address, error = %e, "cache write-through failed");
                }
                batch.inner.lock().await.merge_final(address, m);
            }
            Ok(m) if m.status == ProfileStatus::Pending => {
                debug!(address, period = period.as_cache_key(), "profile still pending upstream");
            }
            Ok(_) => {
                metrics::counter!("board_enrichment_unknown_total").increment(1);
                batch.inner.lock().await.merge_if_vacant(
                    address,
                    PeriodMetrics::unknown(),
                    Completeness::Unknown,
                );
            }
            Err(FetchError::NotFound) => {
                let m = PeriodMetrics::empty();
                if let Err(e) = self.cache.put(address, period, m.clone()).await {
                    warn!(address, error = %e, "cache write-through failed");
                }
                batch.inner.lock().await.merge_final(address, m);
            }
            Err(FetchError::Upstream(e)) => {
                warn!(address, error = %e, "profile fetch failed, substituting unknown");
                metrics::counter!("board_enrichment_fetch_errors_total").increment(1);
                batch.inner.lock().await.merge_if_vacant(
                    address,
                    PeriodMetrics::unknown(),
                    Completeness::Unknown,
                );
            }
        }
    }

    /// One poll tick: re-check up to `POLL_ADDRESS_CAP` addresses still
    /// lacking a finalized result. Merging the same result twice is a no-op.
    pub async fn poll_tick(&self, batch: &Batch) {
        let mut candidates = batch.unresolved().await;
        candidates.truncate(POLL_ADDRESS_CAP);
        self.resolve_pass(batch, candidates).await;
    }

    /// Start the repeating background poll for a batch. Ticks never overlap:
    /// the next interval fire waits for the previous tick to finish. The
    /// task stops itself once every address is finalized.
    pub fn spawn_poller(self: &Arc<Self>, batch: Batch) -> Poller {
        let cancel = CancellationToken::new();
        let orchestrator = Arc::clone(self);
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(orchestrator.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The immediate first fire duplicates the initial resolve pass.
            interval.tick().await;

            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => {
                        debug!("enrichment poller cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        orchestrator.poll_tick(&batch).await;
                        if batch.is_complete().await {
                            debug!("batch fully resolved, poller stopping");
                            break;
                        }
                    }
                }
            }
        });

        Poller { cancel, handle }
    }

    /// Single-address resolution for the HTTP surface. Cache hit wins;
    /// otherwise fetch with the usual degradation. A `pending` result is
    /// returned to the caller as-is and never cached.
    pub async fn profile(&self, address: &str, period: TimePeriod) -> PeriodMetrics {
        let address = address.to_lowercase();
        match self.cache.get(&address, period).await {
            Ok(Some(m)) => return m,
            Ok(None) => {}
            Err(e) => warn!(address = %address, error = %e, "cache read failed, fetching upstream"),
        }

        match self.fetcher.fetch_profile(&address, period).await {
            Ok(m) if m.status == ProfileStatus::Success => {
                if let Err(e) = self.cache.put(&address, period, m.clone()).await {
                    warn!(address, error = %e, "cache write-through failed");
                }
                m
            }
            Ok(m) if m.status == ProfileStatus::Pending => m,
            Ok(_) => PeriodMetrics::unknown(),
            Err(FetchError::NotFound) => {
                let m = PeriodMetrics::empty();
                if let Err(e) = self.cache.put(&address, period, m.clone()).await {
                    warn!(address, error = %e, "cache write-through failed");
                }
                m
            }
            Err(FetchError::Upstream(e)) => {
                warn!(address, error = %e, "profile fetch failed, substituting unknown");
                PeriodMetrics::unknown()
            }
        }
    }

    /// Fill the cache for every period of one address. Used for
    /// fire-and-forget pre-warming of newly watched addresses; failures are
    /// logged by the fetch path and otherwise swallowed.
    pub async fn prewarm(&self, address: &str) {
        info!(address, "pre-warming cache");
        for period in TimePeriod::ALL_PERIODS {
            let _ = self.profile(address, period).await;
        }
    }
}
