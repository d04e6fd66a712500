use anyhow::{Context, Result};
use common::db::AsyncDb;
use common::types::{PeriodMetrics, TimePeriod};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Completion marker key in the `meta` table.
pub const MIGRATION_MARKER: &str = "legacy_migration";

/// A watch-list entry from the legacy flat-file layout.
#[derive(Debug, Clone)]
pub struct LegacyWatched {
    pub address: String,
    pub label: Option<String>,
    pub added_at: Option<i64>,
}

/// One legacy per-address profile file, body unparsed.
#[derive(Debug, Clone)]
pub struct LegacyProfile {
    pub address: String,
    pub raw_json: String,
    pub modified_at: Option<i64>,
}

/// Abstract reader over the legacy data, so the migration is callable from
/// tests without a live filesystem.
pub trait LegacySource {
    fn watched_addresses(&self) -> Result<Vec<LegacyWatched>>;
    fn profiles(&self) -> Result<Vec<LegacyProfile>>;
}

/// The real on-disk layout: one `watched_addresses.json` array and a
/// `whales/` directory of `<address>.json` files.
pub struct FsLegacySource {
    data_dir: PathBuf,
}

impl FsLegacySource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

/// Watched entries were stored either as bare address strings or as
/// `{address, label, addedAt}` objects depending on the writer's vintage.
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyWatchedValue {
    Bare(String),
    Labeled {
        address: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(rename = "addedAt", default)]
        added_at: Option<i64>,
    },
}

impl LegacySource for FsLegacySource {
    fn watched_addresses(&self) -> Result<Vec<LegacyWatched>> {
        let path = self.data_dir.join("watched_addresses.json");
        if !path.exists() {
            info!(path = %path.display(), "no legacy watch-list file, skipping");
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let values: Vec<LegacyWatchedValue> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        Ok(values
            .into_iter()
            .map(|v| match v {
                LegacyWatchedValue::Bare(address) => LegacyWatched {
                    address,
                    label: None,
                    added_at: None,
                },
                LegacyWatchedValue::Labeled {
                    address,
                    label,
                    added_at,
                } => LegacyWatched {
                    address,
                    label,
                    added_at,
                },
            })
            .collect())
    }

    fn profiles(&self) -> Result<Vec<LegacyProfile>> {
        let dir = self.data_dir.join("whales");
        if !dir.exists() {
            info!(dir = %dir.display(), "no legacy whales directory, skipping");
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();
        for dirent in std::fs::read_dir(&dir)
            .with_context(|| format!("failed to list {}", dir.display()))?
        {
            let path = match dirent {
                Ok(d) => d.path(),
                Err(e) => {
                    warn!(error = %e, "unreadable directory entry, skipping");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw_json = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "unreadable legacy profile, skipping");
                    continue;
                }
            };
            let modified_at = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64);

            profiles.push(LegacyProfile {
                address: stem.to_lowercase(),
                raw_json,
                modified_at,
            });
        }
        Ok(profiles)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Watched rows actually inserted (already-present rows don't count).
    pub watched_migrated: u64,
    /// Profile rows written (insert-or-replace).
    pub profiles_migrated: u64,
    /// Legacy profile files that failed validation and were skipped.
    pub skipped: u64,
}

pub async fn is_migrated(db: &AsyncDb) -> Result<bool> {
    db.call_named("migration.check_marker", |conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM meta WHERE key = ?1",
            [MIGRATION_MARKER],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    })
    .await
}

/// One-shot, re-runnable transfer of the legacy flat files into the store.
///
/// Watched rows are insert-or-ignore with the file's own timestamp when it
/// recorded one; profiles are insert-or-replace keyed by address with the
/// file mtime as `lastUpdated`. A single bad profile file is logged and
/// skipped. All row writes commit in one transaction, and the run ends by
/// checkpointing the WAL into the main database file — the explicit flush
/// the legacy engine needed — plus a completion marker in `meta`.
pub async fn run<S: LegacySource>(db: &AsyncDb, source: &S) -> Result<MigrationReport> {
    let watched = source
        .watched_addresses()
        .unwrap_or_else(|e| {
            warn!(error = %e, "legacy watch-list unreadable, migrating profiles only");
            vec![]
        });
    let profiles = source.profiles().unwrap_or_else(|e| {
        warn!(error = %e, "legacy profiles unreadable, migrating watch-list only");
        vec![]
    });

    // Validate each profile parses into a period map before touching the DB.
    let mut skipped = 0_u64;
    let mut rows: Vec<(String, String, Option<i64>)> = Vec::with_capacity(profiles.len());
    for profile in profiles {
        match parse_legacy_periods(&profile.raw_json) {
            Some(periods) => {
                // Re-serialize so the stored blob is exactly the shape the
                // cache reads, whatever wrapper the legacy file used.
                let data = serde_json::to_string(&periods)?;
                rows.push((profile.address, data, profile.modified_at));
            }
            None => {
                warn!(address = %profile.address, "unparseable legacy profile, skipping");
                skipped += 1;
            }
        }
    }

    let now = chrono::Utc::now().timestamp_millis();
    let mut report = db
        .call_named("migration.run", move |conn| {
            let tx = conn.transaction()?;
            let mut report = MigrationReport::default();

            for w in watched {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO watched (address, label, added_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        w.address.trim().to_lowercase(),
                        w.label,
                        w.added_at.unwrap_or(now)
                    ],
                )?;
                report.watched_migrated += inserted as u64;
            }

            for (address, data, modified_at) in rows {
                tx.execute(
                    "INSERT OR REPLACE INTO whales (address, data, last_updated) VALUES (?1, ?2, ?3)",
                    rusqlite::params![address, data, modified_at.unwrap_or(now)],
                )?;
                report.profiles_migrated += 1;
            }

            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value, updated_at) VALUES (?1, 'done', ?2)",
                rusqlite::params![MIGRATION_MARKER, now],
            )?;
            tx.commit()?;

            // Legacy sql.js required an explicit export-to-disk after writes;
            // the equivalent here is forcing the WAL into the database file.
            let _ = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_row| Ok(()));

            Ok(report)
        })
        .await?;
    report.skipped = skipped;

    info!(
        watched = report.watched_migrated,
        profiles = report.profiles_migrated,
        skipped = report.skipped,
        "legacy migration finished"
    );
    Ok(report)
}

/// Legacy profile files held either the bare period map or a
/// `{periods: {...}, ...}` wrapper.
fn parse_legacy_periods(raw: &str) -> Option<HashMap<TimePeriod, PeriodMetrics>> {
    #[derive(Deserialize)]
    struct Wrapper {
        periods: HashMap<TimePeriod, PeriodMetrics>,
    }

    if let Ok(periods) = serde_json::from_str::<HashMap<TimePeriod, PeriodMetrics>>(raw) {
        return Some(periods);
    }
    serde_json::from_str::<Wrapper>(raw).ok().map(|w| w.periods)
}
