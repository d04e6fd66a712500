use anyhow::Result;
use board::config::BoardConfig;
use board::migration::{self, FsLegacySource};

/// One-shot runner for the legacy flat-file migration. Safe to re-run.
#[tokio::main]
async fn main() -> Result<()> {
    let dispatch = common::observability::build_dispatch("info");
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(BoardConfig::default_config_path);
    let config = BoardConfig::load(&config_path)?;

    let Some(dir) = config.migration.legacy_data_dir else {
        anyhow::bail!("migration.legacy_data_dir is not configured in {config_path}");
    };

    let db = common::db::AsyncDb::open(&config.database.path).await?;
    let report = migration::run(&db, &FsLegacySource::new(&dir)).await?;

    println!(
        "migrated {} watched addresses and {} whale profiles from {dir} ({} skipped)",
        report.watched_migrated, report.profiles_migrated, report.skipped
    );
    Ok(())
}
