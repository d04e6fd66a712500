use crate::types::{PeriodMetrics, ProfileStatus, TimePeriod};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Provider-fetch failure taxonomy. Neither variant is fatal to a batch:
/// `Upstream` degrades to the unknown sentinel, `NotFound` to zeroed metrics.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream has no data for this address")]
    NotFound,
}

/// Polymarket Data API client, owned by the composition root and injected
/// into the components that need it.
pub struct PolymarketClient {
    data_api_url: String,
    client: reqwest::Client,
    rate_limit_delay: Duration,
}

impl PolymarketClient {
    pub fn new(data_api_url: &str, rate_limit_delay_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            data_api_url: data_api_url.trim_end_matches('/').to_string(),
            client,
            rate_limit_delay: Duration::from_millis(rate_limit_delay_ms),
        }
    }

    /// Fetch one page of the ranked-trader leaderboard.
    /// Returns an empty page on HTTP 429 after a short backoff.
    pub async fn fetch_leaderboard_page(
        &self,
        period: TimePeriod,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ApiLeaderboardEntry>> {
        let url = format!(
            "{}/v1/leaderboard?timePeriod={}&limit={limit}&offset={offset}",
            self.data_api_url,
            period.as_api_param()
        );
        debug!(url = %url, "fetching leaderboard page");

        tokio::time::sleep(self.rate_limit_delay).await;

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch leaderboard page at offset {offset}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                warn!(offset, "rate limited fetching leaderboard, backing off");
                tokio::time::sleep(Duration::from_secs(2)).await;
                return Ok(vec![]);
            }
            anyhow::bail!("leaderboard API returned {status}: {body}");
        }

        let entries: Vec<ApiLeaderboardEntry> = resp
            .json()
            .await
            .context("failed to deserialize leaderboard response")?;

        debug!(offset, count = entries.len(), "fetched leaderboard page");
        Ok(entries)
    }

    /// Fetch per-period profile metrics for one wallet. The provider may
    /// answer `status: pending` while it is still aggregating upstream.
    pub async fn fetch_profile(
        &self,
        address: &str,
        period: TimePeriod,
    ) -> Result<ApiProfile, FetchError> {
        let encoded = urlencoding::encode(address);
        let url = format!(
            "{}/v1/wallets/{encoded}/profile?timePeriod={}",
            self.data_api_url,
            period.as_api_param()
        );

        tokio::time::sleep(self.rate_limit_delay).await;

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Upstream(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Upstream(format!(
                "profile API returned {status}: {body}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| FetchError::Upstream(format!("bad profile body: {e}")))
    }

    /// Raw positions passthrough, not part of the enrichment state machine.
    pub async fn fetch_positions(&self, address: &str, limit: u32) -> Result<serde_json::Value> {
        let encoded = urlencoding::encode(address);
        let url = format!(
            "{}/positions?user={encoded}&limit={limit}",
            self.data_api_url
        );

        tokio::time::sleep(self.rate_limit_delay).await;

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch positions for {address}"))?;
        anyhow::ensure!(
            resp.status().is_success(),
            "positions API returned {}",
            resp.status()
        );
        resp.json().await.context("bad positions body")
    }

    /// Raw activity passthrough, not part of the enrichment state machine.
    pub async fn fetch_activity(&self, address: &str, limit: u32) -> Result<serde_json::Value> {
        let encoded = urlencoding::encode(address);
        let url = format!("{}/activity?user={encoded}&limit={limit}", self.data_api_url);

        tokio::time::sleep(self.rate_limit_delay).await;

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch activity for {address}"))?;
        anyhow::ensure!(
            resp.status().is_success(),
            "activity API returned {}",
            resp.status()
        );
        resp.json().await.context("bad activity body")
    }
}

/// Leaderboard entry from the Data API `/v1/leaderboard`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiLeaderboardEntry {
    #[serde(deserialize_with = "de_opt_string_any", default)]
    pub rank: Option<String>,
    #[serde(rename = "proxyWallet", alias = "proxy_wallet")]
    pub proxy_wallet: Option<String>,
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
    #[serde(rename = "xUsername")]
    pub x_username: Option<String>,
    #[serde(rename = "profileImage")]
    pub profile_image: Option<String>,
    #[serde(rename = "verifiedBadge")]
    pub verified_badge: Option<bool>,
    pub vol: Option<f64>,
    pub pnl: Option<f64>,
    pub trades: Option<u64>,
    pub positions: Option<u64>,
}

/// Per-period wallet profile from the Data API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProfile {
    pub pnl: Option<f64>,
    pub volume: Option<f64>,
    pub trade_count: Option<u64>,
    pub trade_count_display: Option<String>,
    pub win_rate: Option<f64>,
    pub smart_score: Option<i64>,
    pub status: Option<String>,
}

impl ApiProfile {
    /// Normalize into the canonical metrics record. A missing status field
    /// counts as success (older API revisions omitted it).
    pub fn into_metrics(self) -> PeriodMetrics {
        let status = self
            .status
            .as_deref()
            .and_then(ProfileStatus::from_str_loose)
            .unwrap_or(ProfileStatus::Success);
        PeriodMetrics {
            pnl: self.pnl.unwrap_or(0.0),
            volume: self.volume.unwrap_or(0.0),
            trade_count: self.trade_count.into(),
            trade_count_display: self.trade_count_display,
            win_rate: self.win_rate.into(),
            smart_score: self.smart_score.into(),
            status,
        }
    }
}

/// Deserialize a field that can be either a string or a number into `Option<String>`.
fn de_opt_string_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrNumber;

    impl<'de> de::Visitor<'de> for StringOrNumber {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}
