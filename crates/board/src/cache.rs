use anyhow::Result;
use common::db::AsyncDb;
use common::types::{CacheEntry, PeriodMetrics, TimePeriod};
use rusqlite::OptionalExtension;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Result of a cache lookup for one (address, period) pair. A miss is
/// reported as `cached: false`, never as an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheLookup {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PeriodMetrics>,
}

/// Durable per-address, per-period metrics cache over the `whales` table.
///
/// Each address owns one row whose `data` column holds the success-only
/// period map as JSON. Periods accumulate independently: writing one period
/// re-serializes the map with the others untouched. The read-modify-write
/// runs inside a single `AsyncDb::call` closure, and the dedicated SQLite
/// thread executes closures sequentially, so concurrent writers to the same
/// address cannot interleave.
pub struct ProfileCache {
    db: AsyncDb,
}

impl ProfileCache {
    pub fn new(db: AsyncDb) -> Self {
        Self { db }
    }

    /// Resolve cache status for many addresses in one DB pass. Every
    /// requested address appears in the result, even on a total miss.
    pub async fn bulk_lookup(
        &self,
        addresses: &[String],
        period: TimePeriod,
    ) -> Result<HashMap<String, CacheLookup>> {
        let addrs: Vec<String> = addresses.iter().map(|a| a.to_lowercase()).collect();
        let rows: Vec<(String, Option<String>)> = self
            .db
            .call_named("cache.bulk_lookup", move |conn| {
                let mut stmt = conn.prepare("SELECT data FROM whales WHERE address = ?1")?;
                let mut rows = Vec::with_capacity(addrs.len());
                for addr in addrs {
                    let data: Option<String> = stmt
                        .query_row([&addr], |row| row.get(0))
                        .optional()?;
                    rows.push((addr, data));
                }
                Ok(rows)
            })
            .await?;

        let mut out = HashMap::with_capacity(rows.len());
        let mut hits = 0_u64;
        for (addr, data) in rows {
            let metrics = data
                .and_then(|d| parse_periods(&addr, &d))
                .and_then(|mut periods| periods.remove(&period));
            if metrics.is_some() {
                hits += 1;
            }
            out.insert(
                addr,
                CacheLookup {
                    cached: metrics.is_some(),
                    metrics,
                },
            );
        }
        metrics::counter!("board_cache_hits_total").increment(hits);
        metrics::counter!("board_cache_misses_total").increment(out.len() as u64 - hits);
        Ok(out)
    }

    /// Full cache entries (all periods) for many addresses, for the bulk
    /// HTTP endpoint. Missing addresses map to `None`.
    pub async fn bulk_entries(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, Option<CacheEntry>>> {
        let addrs: Vec<String> = addresses.iter().map(|a| a.to_lowercase()).collect();
        let rows: Vec<(String, Option<(String, i64)>)> = self
            .db
            .call_named("cache.bulk_entries", move |conn| {
                let mut stmt =
                    conn.prepare("SELECT data, last_updated FROM whales WHERE address = ?1")?;
                let mut rows = Vec::with_capacity(addrs.len());
                for addr in addrs {
                    let row: Option<(String, i64)> = stmt
                        .query_row([&addr], |row| Ok((row.get(0)?, row.get(1)?)))
                        .optional()?;
                    rows.push((addr, row));
                }
                Ok(rows)
            })
            .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for (addr, row) in rows {
            let entry = row.and_then(|(data, last_updated)| {
                parse_periods(&addr, &data).map(|periods| CacheEntry {
                    address: addr.clone(),
                    periods,
                    last_updated,
                })
            });
            out.insert(addr, entry);
        }
        Ok(out)
    }

    pub async fn get(&self, address: &str, period: TimePeriod) -> Result<Option<PeriodMetrics>> {
        let addr = address.to_lowercase();
        let addr_for_parse = addr.clone();
        let data: Option<String> = self
            .db
            .call_named("cache.get", move |conn| {
                Ok(conn
                    .query_row("SELECT data FROM whales WHERE address = ?1", [&addr], |row| {
                        row.get(0)
                    })
                    .optional()?)
            })
            .await?;
        Ok(data
            .and_then(|d| parse_periods(&addr_for_parse, &d))
            .and_then(|mut periods| periods.remove(&period)))
    }

    /// Write one period's metrics through to durable storage. Only
    /// `Success` records are accepted; `lastUpdated` is refreshed.
    pub async fn put(&self, address: &str, period: TimePeriod, metrics: PeriodMetrics) -> Result<()> {
        anyhow::ensure!(
            metrics.is_success(),
            "only success metrics are cache-worthy, got status {}",
            metrics.status.as_str()
        );
        let addr = address.to_lowercase();
        let now = chrono::Utc::now().timestamp_millis();
        self.db
            .call_named("cache.put", move |conn| {
                let existing: Option<String> = conn
                    .query_row("SELECT data FROM whales WHERE address = ?1", [&addr], |row| {
                        row.get(0)
                    })
                    .optional()?;
                let mut periods: HashMap<TimePeriod, PeriodMetrics> = existing
                    .and_then(|d| serde_json::from_str(&d).ok())
                    .unwrap_or_default();
                periods.insert(period, metrics);
                let data = serde_json::to_string(&periods)?;
                conn.execute(
                    "INSERT OR REPLACE INTO whales (address, data, last_updated) VALUES (?1, ?2, ?3)",
                    rusqlite::params![addr, data, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Insert-or-replace a whole entry with an explicit timestamp
    /// (migration path). Non-success periods are discarded.
    pub async fn put_entry(&self, mut entry: CacheEntry) -> Result<()> {
        entry.periods.retain(|_, m| m.is_success());
        let addr = entry.address.to_lowercase();
        let data = serde_json::to_string(&entry.periods)?;
        let last_updated = entry.last_updated;
        self.db
            .call_named("cache.put_entry", move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO whales (address, data, last_updated) VALUES (?1, ?2, ?3)",
                    rusqlite::params![addr, data, last_updated],
                )?;
                Ok(())
            })
            .await
    }
}

fn parse_periods(address: &str, data: &str) -> Option<HashMap<TimePeriod, PeriodMetrics>> {
    match serde_json::from_str(data) {
        Ok(periods) => Some(periods),
        Err(e) => {
            warn!(address, error = %e, "unreadable cache blob, treating as miss");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{Metric, ProfileStatus};

    async fn test_cache() -> ProfileCache {
        ProfileCache::new(AsyncDb::open_memory().await.unwrap())
    }

    fn success_metrics(pnl: f64) -> PeriodMetrics {
        PeriodMetrics {
            pnl,
            volume: pnl * 10.0,
            trade_count: Metric::Known(5),
            trade_count_display: None,
            win_rate: Metric::Known(0.6),
            smart_score: Metric::Known(70),
            status: ProfileStatus::Success,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let cache = test_cache().await;
        let m = success_metrics(100.0);
        cache.put("0xAbC", TimePeriod::Day, m.clone()).await.unwrap();

        // Addresses are lowercase-normalized on both paths.
        let got = cache.get("0xabc", TimePeriod::Day).await.unwrap();
        assert_eq!(got, Some(m));
    }

    #[tokio::test]
    async fn test_periods_are_isolated() {
        let cache = test_cache().await;
        cache
            .put("0xabc", TimePeriod::Day, success_metrics(1.0))
            .await
            .unwrap();
        cache
            .put("0xabc", TimePeriod::Week, success_metrics(2.0))
            .await
            .unwrap();

        // Updating one period must not erase the other.
        cache
            .put("0xabc", TimePeriod::Day, success_metrics(3.0))
            .await
            .unwrap();

        let day = cache.get("0xabc", TimePeriod::Day).await.unwrap().unwrap();
        let week = cache.get("0xabc", TimePeriod::Week).await.unwrap().unwrap();
        assert_eq!(day.pnl, 3.0);
        assert_eq!(week.pnl, 2.0);
        assert!(cache
            .get("0xabc", TimePeriod::Month)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_put_rejects_non_success() {
        let cache = test_cache().await;

        let mut pending = success_metrics(1.0);
        pending.status = ProfileStatus::Pending;
        assert!(cache.put("0xabc", TimePeriod::Day, pending).await.is_err());

        assert!(cache
            .put("0xabc", TimePeriod::Day, PeriodMetrics::unknown())
            .await
            .is_err());

        assert!(cache.get("0xabc", TimePeriod::Day).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_lookup_includes_every_address() {
        let cache = test_cache().await;
        cache
            .put("0xaaa", TimePeriod::Week, success_metrics(7.0))
            .await
            .unwrap();

        let addresses = vec![
            "0xaaa".to_string(),
            "0xbbb".to_string(),
            "0xccc".to_string(),
        ];
        let lookups = cache
            .bulk_lookup(&addresses, TimePeriod::Week)
            .await
            .unwrap();

        assert_eq!(lookups.len(), 3);
        assert!(lookups["0xaaa"].cached);
        assert_eq!(lookups["0xaaa"].metrics.as_ref().unwrap().pnl, 7.0);
        assert!(!lookups["0xbbb"].cached);
        assert!(lookups["0xbbb"].metrics.is_none());
        assert!(!lookups["0xccc"].cached);
    }

    #[tokio::test]
    async fn test_bulk_lookup_misses_wrong_period() {
        let cache = test_cache().await;
        cache
            .put("0xaaa", TimePeriod::Week, success_metrics(7.0))
            .await
            .unwrap();

        let lookups = cache
            .bulk_lookup(&["0xaaa".to_string()], TimePeriod::Day)
            .await
            .unwrap();
        assert!(!lookups["0xaaa"].cached);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_a_miss_not_an_error() {
        let cache = test_cache().await;
        cache
            .db
            .call(|conn| {
                conn.execute(
                    "INSERT INTO whales (address, data, last_updated) VALUES ('0xbad', 'not json', 1)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(cache.get("0xbad", TimePeriod::All).await.unwrap().is_none());
        let lookups = cache
            .bulk_lookup(&["0xbad".to_string()], TimePeriod::All)
            .await
            .unwrap();
        assert!(!lookups["0xbad"].cached);
    }

    #[tokio::test]
    async fn test_concurrent_writers_to_same_address() {
        let cache = std::sync::Arc::new(test_cache().await);
        let c1 = std::sync::Arc::clone(&cache);
        let c2 = std::sync::Arc::clone(&cache);

        let (a, b) = tokio::join!(
            c1.put("0xabc", TimePeriod::Day, success_metrics(1.0)),
            c2.put("0xabc", TimePeriod::Week, success_metrics(2.0)),
        );
        a.unwrap();
        b.unwrap();

        // Neither write may clobber the other.
        assert!(cache.get("0xabc", TimePeriod::Day).await.unwrap().is_some());
        assert!(cache.get("0xabc", TimePeriod::Week).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_refreshes_last_updated() {
        let cache = test_cache().await;
        cache
            .put_entry(CacheEntry {
                address: "0xabc".to_string(),
                periods: HashMap::from([(TimePeriod::Day, success_metrics(1.0))]),
                last_updated: 1,
            })
            .await
            .unwrap();

        cache
            .put("0xabc", TimePeriod::Week, success_metrics(2.0))
            .await
            .unwrap();

        let entries = cache.bulk_entries(&["0xabc".to_string()]).await.unwrap();
        let entry = entries["0xabc"].as_ref().unwrap();
        assert!(entry.last_updated > 1);
        assert_eq!(entry.periods.len(), 2);
    }

    #[tokio::test]
    async fn test_put_entry_discards_non_success_periods() {
        let cache = test_cache().await;
        let mut pending = success_metrics(1.0);
        pending.status = ProfileStatus::Pending;
        cache
            .put_entry(CacheEntry {
                address: "0xabc".to_string(),
                periods: HashMap::from([
                    (TimePeriod::Day, success_metrics(5.0)),
                    (TimePeriod::Week, pending),
                ]),
                last_updated: 10,
            })
            .await
            .unwrap();

        assert!(cache.get("0xabc", TimePeriod::Day).await.unwrap().is_some());
        assert!(cache.get("0xabc", TimePeriod::Week).await.unwrap().is_none());
    }
}
