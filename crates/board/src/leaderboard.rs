use crate::fetchers::LeaderboardPager;
use anyhow::Result;
use common::types::{TimePeriod, TraderRecord};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Hard cap on returned traders regardless of what the caller asks for.
pub const MAX_LEADERBOARD_LIMIT: u32 = 500;
/// Upstream page size; the provider caps pages at 50 entries.
const PAGE_SIZE: u32 = 50;

/// Fetches ranked trader data across however many pages are needed and
/// normalizes it into [`TraderRecord`]s.
pub struct Leaderboard<P> {
    pager: Arc<P>,
}

impl<P: LeaderboardPager + Sync> Leaderboard<P> {
    pub fn new(pager: Arc<P>) -> Self {
        Self { pager }
    }

    /// Top traders in rank order, at most `min(limit, 500)` of them.
    /// Pages may overlap at boundaries; the first occurrence of an address
    /// wins since it carries the better rank. A page failure after the
    /// first page degrades to the rows already collected.
    pub async fn top_traders(&self, limit: u32, period: TimePeriod) -> Result<Vec<TraderRecord>> {
        let limit = limit.min(MAX_LEADERBOARD_LIMIT) as usize;
        let mut out: Vec<TraderRecord> = Vec::with_capacity(limit);
        let mut seen: HashSet<String> = HashSet::with_capacity(limit);
        let mut offset = 0_u32;

        while out.len() < limit {
            let entries = match self.pager.fetch_leaderboard_page(period, PAGE_SIZE, offset).await
            {
                Ok(entries) => entries,
                Err(e) if out.is_empty() => return Err(e),
                Err(e) => {
                    warn!(offset, error = %e, "leaderboard page fetch failed, returning partial result");
                    break;
                }
            };
            if entries.is_empty() {
                break;
            }
            let page_len = entries.len();

            for entry in entries {
                let Some(wallet) = entry.proxy_wallet else {
                    continue;
                };
                let address = wallet.to_lowercase();
                if !seen.insert(address.clone()) {
                    continue;
                }
                let rank = entry
                    .rank
                    .as_deref()
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(out.len() as u32 + 1);
                out.push(TraderRecord {
                    address,
                    rank,
                    pnl: entry.pnl.unwrap_or(0.0),
                    volume: entry.vol.unwrap_or(0.0),
                    user_name: entry.user_name,
                    x_username: entry.x_username,
                    profile_image: entry.profile_image,
                    verified_badge: entry.verified_badge,
                    trades: entry.trades,
                    positions: entry.positions,
                });
                if out.len() >= limit {
                    break;
                }
            }

            if (page_len as u32) < PAGE_SIZE {
                break; // provider exhausted
            }
            offset += PAGE_SIZE;
        }

        metrics::counter!("board_leaderboard_requests_total").increment(1);
        Ok(out)
    }
}
