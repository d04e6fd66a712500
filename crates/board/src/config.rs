use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub polymarket: PolymarketConfig,
    pub enrichment: EnrichmentConfig,
    pub leaderboard: LeaderboardConfig,
    pub migration: MigrationConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketConfig {
    pub data_api_url: String,
    pub rate_limit_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    pub poll_interval_secs: u64,
    /// How long the startup watch-list warm-up may keep polling before it
    /// is cancelled.
    pub warm_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardConfig {
    pub default_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Legacy flat-file data directory (the one holding
    /// `watched_addresses.json` and `whales/`). Absent = nothing to migrate.
    pub legacy_data_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub prometheus_port: u16,
}

impl BoardConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: BoardConfig = toml::from_str(content).context("failed to parse board config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            self.enrichment.poll_interval_secs > 0,
            "enrichment.poll_interval_secs must be > 0"
        );
        anyhow::ensure!(
            self.leaderboard.default_limit > 0
                && self.leaderboard.default_limit <= crate::leaderboard::MAX_LEADERBOARD_LIMIT,
            "leaderboard.default_limit must be in (0, {}]",
            crate::leaderboard::MAX_LEADERBOARD_LIMIT
        );
        Ok(())
    }

    pub fn default_config_path() -> String {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(std::path::Path::to_path_buf));

        // Check next to the binary first
        if let Some(dir) = &exe_dir {
            let candidate = dir.join("board.toml");
            if candidate.exists() {
                return candidate.to_string_lossy().to_string();
            }
        }

        // Check config/ directory relative to cwd
        let candidate = Path::new("config/board.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        // Check crates/board/config/ (development)
        let candidate = Path::new("crates/board/config/board.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        // Fallback
        "config/board.toml".to_string()
    }
}
