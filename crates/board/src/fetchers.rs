use anyhow::Result;
use common::polymarket::{ApiLeaderboardEntry, FetchError, PolymarketClient};
use common::types::{PeriodMetrics, TimePeriod};

/// One page of ranked traders from the external provider.
pub trait LeaderboardPager {
    fn fetch_leaderboard_page(
        &self,
        period: TimePeriod,
        limit: u32,
        offset: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ApiLeaderboardEntry>>> + Send;
}

/// Per-(address, period) metrics from the external provider.
/// May report `status: pending` meaning "still computing upstream, poll again".
pub trait ProfileFetcher {
    fn fetch_profile(
        &self,
        address: &str,
        period: TimePeriod,
    ) -> impl std::future::Future<Output = Result<PeriodMetrics, FetchError>> + Send;
}

impl LeaderboardPager for PolymarketClient {
    async fn fetch_leaderboard_page(
        &self,
        period: TimePeriod,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ApiLeaderboardEntry>> {
        PolymarketClient::fetch_leaderboard_page(self, period, limit, offset).await
    }
}

impl ProfileFetcher for PolymarketClient {
    async fn fetch_profile(
        &self,
        address: &str,
        period: TimePeriod,
    ) -> Result<PeriodMetrics, FetchError> {
        PolymarketClient::fetch_profile(self, address, period)
            .await
            .map(common::polymarket::ApiProfile::into_metrics)
    }
}
