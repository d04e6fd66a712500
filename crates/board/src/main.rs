use anyhow::Result;
use board::config::BoardConfig;
use board::{api, cache, enrichment, leaderboard, migration, watchlist};
use common::types::TimePeriod;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(BoardConfig::default_config_path);
    let config = BoardConfig::load(&config_path)?;

    let dispatch = common::observability::build_dispatch(&config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    info!(path = %config_path, "whale board starting");

    board::metrics::install_prometheus(config.observability.prometheus_port)?;
    board::metrics::describe();

    let db = common::db::AsyncDb::open(&config.database.path).await?;

    // Absorb the legacy flat files once, on the first boot that finds them.
    if let Some(dir) = &config.migration.legacy_data_dir {
        if std::path::Path::new(dir).exists() && !migration::is_migrated(&db).await? {
            let report = migration::run(&db, &migration::FsLegacySource::new(dir)).await?;
            info!(
                watched = report.watched_migrated,
                profiles = report.profiles_migrated,
                skipped = report.skipped,
                "legacy data migrated"
            );
        }
    }

    let client = Arc::new(common::polymarket::PolymarketClient::new(
        &config.polymarket.data_api_url,
        config.polymarket.rate_limit_delay_ms,
    ));
    let cache = Arc::new(cache::ProfileCache::new(db.clone()));
    let enrichment = Arc::new(enrichment::Enrichment::new(
        Arc::clone(&cache),
        Arc::clone(&client),
        Duration::from_secs(config.enrichment.poll_interval_secs),
    ));
    let watchlist = Arc::new(watchlist::WatchList::new(db, Arc::clone(&enrichment)));
    let leaderboard = Arc::new(leaderboard::Leaderboard::new(Arc::clone(&client)));

    // Warm the watch-list in the background so its metrics are ready before
    // the first page load. The poller stops itself once everything settles;
    // the deadline guards against addresses stuck pending upstream.
    let watched_rows = watchlist.list().await.unwrap_or_default();
    if !watched_rows.is_empty() {
        let enrichment = Arc::clone(&enrichment);
        let warm_deadline = Duration::from_secs(config.enrichment.warm_deadline_secs);
        tokio::spawn(async move {
            let addresses: Vec<String> =
                watched_rows.into_iter().map(|w| w.address).collect();
            info!(count = addresses.len(), "warming watch-list cache");
            let batch = enrichment
                .resolve_batch(&addresses, TimePeriod::All, &[])
                .await;
            let poller = enrichment.spawn_poller(batch);
            let cancel = poller.cancel_handle();
            if tokio::time::timeout(warm_deadline, poller.join()).await.is_err() {
                warn!("watch-list warm-up did not settle in time, cancelling poller");
                cancel.cancel();
            }
        });
    }

    let state = Arc::new(api::AppState {
        cache,
        enrichment,
        watchlist,
        leaderboard,
        client,
        default_leaderboard_limit: config.leaderboard.default_limit,
        started_at: chrono::Utc::now(),
    });
    let app = api::router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr = %bind_addr, "starting board HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
