use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Time window over which trader metrics are aggregated.
///
/// Serialized form (`24h`/`7d`/`30d`/`all`) is what HTTP callers and the
/// cached period maps use; the upstream API wants `DAY`/`WEEK`/`MONTH`/`ALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimePeriod {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "all")]
    All,
}

impl TimePeriod {
    pub const ALL_PERIODS: [Self; 4] = [Self::Day, Self::Week, Self::Month, Self::All];

    pub fn as_cache_key(self) -> &'static str {
        match self {
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
            Self::All => "all",
        }
    }

    /// Value the upstream leaderboard/profile endpoints expect in `timePeriod`.
    pub fn as_api_param(self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Week => "WEEK",
            Self::Month => "MONTH",
            Self::All => "ALL",
        }
    }

    /// Accepts both the cache-key spelling and the upstream spelling.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "24h" | "day" | "1d" => Some(Self::Day),
            "7d" | "week" => Some(Self::Week),
            "30d" | "month" => Some(Self::Month),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// A metric that may not have been computed yet.
///
/// `Unresolved` serializes as JSON `null`, keeping "not yet computed"
/// distinct from "computed as zero".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric<T> {
    Known(T),
    Unresolved,
}

impl<T> Metric<T> {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved)
    }

    pub fn known(self) -> Option<T> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unresolved => None,
        }
    }
}

impl<T> Default for Metric<T> {
    fn default() -> Self {
        Self::Unresolved
    }
}

impl<T> From<Option<T>> for Metric<T> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Unresolved, Self::Known)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    #[default]
    Success,
    Pending,
    Error,
}

impl ProfileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "success" | "ok" => Some(Self::Success),
            "pending" => Some(Self::Pending),
            "error" | "failed" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Per-(address, period) performance metrics.
///
/// Only `status == Success` records are cache-worthy; `Pending` means the
/// upstream is still computing and `Error` records are ephemeral fallbacks
/// that callers may render but must never persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodMetrics {
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub trade_count: Metric<u64>,
    /// Human string shown when the true count is truncated upstream, e.g. "> 10000".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_count_display: Option<String>,
    #[serde(default)]
    pub win_rate: Metric<f64>,
    #[serde(default)]
    pub smart_score: Metric<i64>,
    #[serde(default)]
    pub status: ProfileStatus,
}

impl PeriodMetrics {
    /// Fallback substituted when an upstream fetch fails, so callers can
    /// render a value instead of spinning forever. Never cached.
    pub fn unknown() -> Self {
        Self {
            pnl: 0.0,
            volume: 0.0,
            trade_count: Metric::Known(0),
            trade_count_display: None,
            win_rate: Metric::Known(0.0),
            smart_score: Metric::Known(0),
            status: ProfileStatus::Error,
        }
    }

    /// Zeroed metrics for an address the provider has no data for.
    pub fn empty() -> Self {
        Self {
            pnl: 0.0,
            volume: 0.0,
            trade_count: Metric::Known(0),
            trade_count_display: None,
            win_rate: Metric::Known(0.0),
            smart_score: Metric::Known(0),
            status: ProfileStatus::Success,
        }
    }

    /// Provisional metrics synthesized from a leaderboard row so the first
    /// paint of the all-time view is immediate. Win rate and score stay
    /// unresolved until a full profile fetch lands.
    pub fn from_leaderboard(rec: &TraderRecord) -> Self {
        Self {
            pnl: rec.pnl,
            volume: rec.volume,
            trade_count: rec.trades.into(),
            trade_count_display: None,
            win_rate: Metric::Unresolved,
            smart_score: Metric::Unresolved,
            status: ProfileStatus::Success,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProfileStatus::Success
    }
}

/// One row of a leaderboard snapshot, normalized from the upstream entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderRecord {
    pub address: String,
    pub rank: u32,
    pub pnl: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_badge: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trades: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<u64>,
}

/// Durable per-address cache record: success-only metrics accumulated
/// per period, plus the timestamp of the most recent successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub address: String,
    pub periods: HashMap<TimePeriod, PeriodMetrics>,
    pub last_updated: i64,
}

/// An address the operator has marked for ongoing tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedAddress {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub added_at: i64,
}
