use anyhow::{Context, Result};

/// Async wrapper around `tokio_rusqlite::Connection`.
///
/// Runs all SQLite operations on a dedicated background thread, keeping the
/// Tokio runtime cooperative. Clone is cheap (shared mpsc sender to the
/// background thread). Because every closure executes sequentially on that
/// one thread, read-modify-write sequences inside a single `call` can never
/// interleave with another writer — this is the store's serialization
/// guarantee for same-row updates.
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path`, creating parent directories as needed,
    /// set PRAGMAs (WAL, busy_timeout) and apply the schema batch.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create DB directory: {}", parent.display())
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .with_context(|| format!("failed to open database: {path}"))?;

        conn.call(|conn| -> std::result::Result<(), rusqlite::Error> {
            conn.busy_timeout(std::time::Duration::from_secs(30))?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("AsyncDb::open: schema setup failed: {e}"))?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub async fn open_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(":memory:")
            .await
            .context("failed to open in-memory database")?;

        conn.call(|conn| -> std::result::Result<(), rusqlite::Error> {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("AsyncDb::open_memory: schema setup failed: {e}"))?;

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return the result.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("database connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("database close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("database error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records latency and error metrics for the
    /// named operation. Measures full wall-clock time including queueing on
    /// the SQLite thread.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        match &res {
            Ok(_) => {
                metrics::histogram!("board_db_query_latency_ms", "op" => op, "status" => "ok")
                    .record(ms);
            }
            Err(_) => {
                metrics::histogram!("board_db_query_latency_ms", "op" => op, "status" => "err")
                    .record(ms);
                metrics::counter!("board_db_query_errors_total", "op" => op).increment(1);
            }
        }

        res
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS watched (
    address TEXT PRIMARY KEY,
    label TEXT,
    added_at INTEGER NOT NULL
);

-- Per-address whale profile snapshots. `data` holds the success-only
-- per-period metrics map as JSON, the same shape the legacy store used.
CREATE TABLE IF NOT EXISTS whales (
    address TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    last_updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_watched_added_at ON watched(added_at);
CREATE INDEX IF NOT EXISTS idx_whales_last_updated ON whales(last_updated);
";
