use crate::enrichment::Enrichment;
use crate::fetchers::ProfileFetcher;
use anyhow::Result;
use common::db::AsyncDb;
use common::types::WatchedAddress;
use std::sync::Arc;
use tracing::info;

/// Labels are short operator mnemonics; anything longer is cut.
pub const MAX_LABEL_LEN: usize = 32;

/// Operator watch-list over the `watched` table. Toggling an address on
/// triggers asynchronous cache pre-warming; the caller never waits for it.
pub struct WatchList<F> {
    db: AsyncDb,
    enrichment: Arc<Enrichment<F>>,
}

impl<F: ProfileFetcher + Send + Sync + 'static> WatchList<F> {
    pub fn new(db: AsyncDb, enrichment: Arc<Enrichment<F>>) -> Self {
        Self { db, enrichment }
    }

    pub async fn list(&self) -> Result<Vec<WatchedAddress>> {
        self.db
            .call_named("watchlist.list", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT address, label, added_at FROM watched ORDER BY added_at, address",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(WatchedAddress {
                            address: row.get(0)?,
                            label: row.get(1)?,
                            added_at: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Toggle tracking for an address. Watching an already-watched address
    /// keeps its original `added_at` (insert-or-ignore); a provided label
    /// always updates in place; unwatching is idempotent. On a genuine
    /// transition to watched, pre-warming is spawned fire-and-forget.
    pub async fn set_watch(&self, address: &str, watched: bool, label: Option<&str>) -> Result<()> {
        let address = address.trim().to_lowercase();

        if !watched {
            let addr = address.clone();
            self.db
                .call_named("watchlist.delete", move |conn| {
                    conn.execute("DELETE FROM watched WHERE address = ?1", [&addr])?;
                    Ok(())
                })
                .await?;
            info!(address = %address, "unwatched");
            return Ok(());
        }

        let label = label.and_then(normalize_label);
        let now = chrono::Utc::now().timestamp_millis();
        let addr = address.clone();
        let newly_watched = self
            .db
            .call_named("watchlist.upsert", move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO watched (address, label, added_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![addr, label, now],
                )?;
                if inserted == 0 {
                    if let Some(label) = label {
                        conn.execute(
                            "UPDATE watched SET label = ?1 WHERE address = ?2",
                            rusqlite::params![label, addr],
                        )?;
                    }
                }
                Ok(inserted > 0)
            })
            .await?;

        if newly_watched {
            info!(address = %address, "watching, pre-warm scheduled");
            let enrichment = Arc::clone(&self.enrichment);
            let addr = address.clone();
            tokio::spawn(async move {
                enrichment.prewarm(&addr).await;
            });
        }
        Ok(())
    }

    /// Shorthand for relabeling an address that is already watched.
    pub async fn update_label(&self, address: &str, label: &str) -> Result<()> {
        self.set_watch(address, true, Some(label)).await
    }

    pub async fn is_watched(&self, address: &str) -> Result<bool> {
        let addr = address.trim().to_lowercase();
        self.db
            .call_named("watchlist.is_watched", move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM watched WHERE address = ?1",
                    [&addr],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }
}

fn normalize_label(label: &str) -> Option<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_LABEL_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProfileCache;
    use common::polymarket::FetchError;
    use common::types::{PeriodMetrics, TimePeriod};
    use std::time::Duration;

    /// Always answers with the same success metrics.
    struct StaticFetcher;

    impl ProfileFetcher for StaticFetcher {
        async fn fetch_profile(
            &self,
            _address: &str,
            _period: TimePeriod,
        ) -> Result<PeriodMetrics, FetchError> {
            Ok(PeriodMetrics::empty())
        }
    }

    async fn test_watchlist() -> (WatchList<StaticFetcher>, Arc<ProfileCache>) {
        let db = AsyncDb::open_memory().await.unwrap();
        let cache = Arc::new(ProfileCache::new(db.clone()));
        let enrichment = Arc::new(Enrichment::new(
            Arc::clone(&cache),
            Arc::new(StaticFetcher),
            Duration::from_secs(3),
        ));
        (WatchList::new(db, enrichment), cache)
    }

    #[tokio::test]
    async fn test_watch_then_unwatch_leaves_no_row() {
        let (watchlist, _cache) = test_watchlist().await;

        watchlist.set_watch("0xAbC", true, None).await.unwrap();
        assert!(watchlist.is_watched("0xabc").await.unwrap());

        watchlist.set_watch("0xabc", false, None).await.unwrap();
        assert!(!watchlist.is_watched("0xabc").await.unwrap());
        assert!(watchlist.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwatch_is_idempotent() {
        let (watchlist, _cache) = test_watchlist().await;
        watchlist.set_watch("0xabc", false, None).await.unwrap();
        watchlist.set_watch("0xabc", false, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_rewatch_preserves_added_at() {
        let (watchlist, _cache) = test_watchlist().await;

        watchlist.set_watch("0xabc", true, None).await.unwrap();
        let first = watchlist.list().await.unwrap()[0].added_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        watchlist.set_watch("0xabc", true, None).await.unwrap();
        let rows = watchlist.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].added_at, first);
    }

    #[tokio::test]
    async fn test_label_update_keeps_single_row() {
        let (watchlist, _cache) = test_watchlist().await;

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
        assert_eq!(rows[0].label.as_deref(), Some("Whale2"));
    }

    #[tokio::test]
    async fn test_rewatch_without_label_keeps_existing_label() {
        let (watchlist, _cache) = test_watchlist().await;

        watchlist
            .set_watch("0xabc", true, Some("Whale1"))
            .await
            .unwrap();
        watchlist.set_watch("0xabc", true, None).await.unwrap();

        let rows = watchlist.list().await.unwrap();
        assert_eq!(rows[0].label.as_deref(), Some("Whale1"));
    }

    #[tokio::test]
    async fn test_update_label_shorthand() {
        let (watchlist, _cache) = test_watchlist().await;
        watchlist.set_watch("0xabc", true, None).await.unwrap();
        watchlist.update_label("0xabc", "Degen").await.unwrap();
        let rows = watchlist.list().await.unwrap();
        assert_eq!(rows[0].label.as_deref(), Some("Degen"));
    }

    #[tokio::test]
    async fn test_label_is_trimmed_and_capped() {
        let (watchlist, _cache) = test_watchlist().await;
        let long = "x".repeat(100);
        watchlist
            .set_watch("0xabc", true, Some(&format!("  {long}  ")))
            .await
            .unwrap();
        let rows = watchlist.list().await.unwrap();
        assert_eq!(rows[0].label.as_deref().unwrap().len(), MAX_LABEL_LEN);
    }

    #[tokio::test]
    async fn test_blank_label_stored_as_none() {
        let (watchlist, _cache) = test_watchlist().await;
        watchlist.set_watch("0xabc", true, Some("   ")).await.unwrap();
        let rows = watchlist.list().await.unwrap();
        assert!(rows[0].label.is_none());
    }

    #[tokio::test]
    async fn test_watch_triggers_prewarm() {
        let (watchlist, cache) = test_watchlist().await;
        watchlist.set_watch("0xabc", true, None).await.unwrap();

        // Pre-warm runs detached; poll briefly for the cache fill.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if cache.get("0xabc", TimePeriod::All).await.unwrap().is_some() {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "pre-warm never filled the cache"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_addresses_normalized_to_lowercase() {
        let (watchlist, _cache) = test_watchlist().await;
        watchlist.set_watch(" 0xAbCdEf ", true, None).await.unwrap();
        let rows = watchlist.list().await.unwrap();
        assert_eq!(rows[0].address, "0xabcdef");
    }
}
