//! End-to-end resolution flows: tiered cache, degradation on upstream
//! failure, poll-to-fill, and watch-list round trips.

use board::cache::ProfileCache;
use board::enrichment::Enrichment;
use board::fetchers::ProfileFetcher;
use board::watchlist::WatchList;
use common::db::AsyncDb;
use common::polymarket::FetchError;
use common::types::{Metric, PeriodMetrics, ProfileStatus, TimePeriod};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone)]
enum Outcome {
    Success(PeriodMetrics),
    Fail,
}

/// Pops one scripted outcome per fetch; an exhausted script fails upstream.
struct ScriptedFetcher {
    script: Mutex<HashMap<String, VecDeque<Outcome>>>,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
        }
    }

    fn script(&self, address: &str, outcomes: Vec<Outcome>) {
        self.script
            .lock()
            .unwrap()
            .insert(address.to_string(), outcomes.into());
    }
}

impl ProfileFetcher for ScriptedFetcher {
    async fn fetch_profile(
        &self,
        address: &str,
        _period: TimePeriod,
    ) -> Result<PeriodMetrics, FetchError> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .get_mut(address)
            .and_then(VecDeque::pop_front);
        match outcome {
            Some(Outcome::Success(m)) => Ok(m),
            _ => Err(FetchError::Upstream("scripted failure".to_string())),
        }
    }
}

fn success_metrics(pnl: f64) -> PeriodMetrics {
    PeriodMetrics {
        pnl,
        volume: pnl * 4.0,
        trade_count: Metric::Known(20),
        trade_count_display: None,
        win_rate: Metric::Known(0.58),
        smart_score: Metric::Known(64),
        status: ProfileStatus::Success,
    }
}

async fn setup() -> (
    Arc<ProfileCache>,
    Arc<ScriptedFetcher>,
    Arc<Enrichment<ScriptedFetcher>>,
) {
    let db = AsyncDb::open_memory().await.unwrap();
    let cache = Arc::new(ProfileCache::new(db));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let enrichment = Arc::new(Enrichment::new(
        Arc::clone(&cache),
        Arc::clone(&fetcher),
        Duration::from_millis(10),
    ));
    (cache, fetcher, enrichment)
}

#[tokio::test]
async fn cache_hit_plus_failed_fetch_then_poll_recovery() {
    let (cache, fetcher, enrichment) = setup().await;

    // a1 is already cached with pnl=100; a2's upstream fetch fails first,
    // then succeeds with pnl=50.
    cache
        .put("0xa1", TimePeriod::All, success_metrics(100.0))
        .await
        .unwrap();
    fetcher.script(
        "0xa2",
        vec![Outcome::Fail, Outcome::Success(success_metrics(50.0))],
    );

    let addresses = vec!["0xa1".to_string(), "0xa2".to_string()];
    let batch = enrichment
        .resolve_batch(&addresses, TimePeriod::All, &[])
        .await;

    // Immediate response: a1 from cache, a2 degraded to the zeroed sentinel.
    let snapshot = batch.snapshot().await;
    assert_eq!(snapshot["0xa1"].pnl, 100.0);
    assert_eq!(snapshot["0xa2"].pnl, 0.0);
    assert_eq!(snapshot["0xa2"].volume, 0.0);
    assert_eq!(snapshot["0xa2"].trade_count, Metric::Known(0));
    assert_eq!(snapshot["0xa2"].win_rate, Metric::Known(0.0));
    assert_eq!(snapshot["0xa2"].smart_score, Metric::Known(0));
    // The sentinel was never persisted.
    assert!(cache.get("0xa2", TimePeriod::All).await.unwrap().is_none());

    // Next poll tick: a2's upstream now succeeds and the mapping updates.
    enrichment.poll_tick(&batch).await;
    let snapshot = batch.snapshot().await;
    assert_eq!(snapshot["0xa1"].pnl, 100.0);
    assert_eq!(snapshot["0xa2"].pnl, 50.0);

    // And the cache now holds a2 permanently.
    let cached = cache.get("0xa2", TimePeriod::All).await.unwrap().unwrap();
    assert_eq!(cached.pnl, 50.0);
}

#[tokio::test]
async fn background_poller_recovers_failures_without_caller_involvement() {
    let (cache, fetcher, enrichment) = setup().await;
    fetcher.script(
        "0xa2",
        vec![Outcome::Fail, Outcome::Success(success_metrics(50.0))],
    );

    let batch = enrichment
        .resolve_batch(&["0xa2".to_string()], TimePeriod::Week, &[])
        .await;
    assert_eq!(batch.snapshot().await["0xa2"].status, ProfileStatus::Error);

    let poller = enrichment.spawn_poller(batch.clone());
    tokio::time::timeout(Duration::from_secs(5), poller.join())
        .await
        .expect("poller should settle the batch and stop");

    assert_eq!(batch.snapshot().await["0xa2"].pnl, 50.0);
    assert!(cache.get("0xa2", TimePeriod::Week).await.unwrap().is_some());
}

#[tokio::test]
async fn second_resolution_is_served_from_cache_alone() {
    let (_cache, fetcher, enrichment) = setup().await;
    fetcher.script("0xa3", vec![Outcome::Success(success_metrics(7.0))]);

    let first = enrichment
        .resolve_batch(&["0xa3".to_string()], TimePeriod::Day, &[])
        .await;
    assert!(first.is_complete().await);

    // The script is exhausted: any further upstream call would fail. A
    // fresh batch must resolve purely from the cache.
    let second = enrichment
        .resolve_batch(&["0xa3".to_string()], TimePeriod::Day, &[])
        .await;
    assert!(second.is_complete().await);
    assert_eq!(second.snapshot().await["0xa3"].pnl, 7.0);
}

#[tokio::test]
async fn watch_toggle_and_label_round_trip() {
    let db = AsyncDb::open_memory().await.unwrap();
    let cache = Arc::new(ProfileCache::new(db.clone()));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let enrichment = Arc::new(Enrichment::new(
        Arc::clone(&cache),
        fetcher,
        Duration::from_secs(3),
    ));
    let watchlist = WatchList::new(db, enrichment);

    // Watch then immediately unwatch leaves no row.
    watchlist.set_watch("0xABC", true, None).await.unwrap();
    watchlist.set_watch("0xabc", false, None).await.unwrap();
    assert!(watchlist.list().await.unwrap().is_empty());

    // Two labeled watches collapse to one row carrying the latest label.
    watchlist
        .set_watch("0xabc", true, Some("Whale1"))
        .await
        .unwrap();
    watchlist
        .set_watch("0xabc", true, Some("Whale2"))
        .await
        .unwrap();
    let rows = watchlist.list().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address, "0xabc");
    assert_eq!(rows[0].label.as_deref(), Some("Whale2"));
}
