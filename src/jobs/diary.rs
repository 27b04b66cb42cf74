use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration};
use tracing::{debug, info, warn};

use crate::config::DIARY_ENDPOINT;
use crate::db::MatchRepository;
use crate::error::Result;
use crate::provider::payload::{entries, parse_diary_entry};
use crate::provider::ProviderClient;
use crate::reconciler::guard_status;
use crate::types::{now_secs, MatchStatus};

/// Creates rows for scheduled matches. Existing rows are never touched.
pub struct DiarySync {
    provider: Arc<ProviderClient>,
    repo: MatchRepository,
}

impl DiarySync {
    pub fn new(provider: Arc<ProviderClient>, repo: MatchRepository) -> Self {
        Self { provider, repo }
    }

    /// Today and tomorrow (UTC). Returns the number of new matches.
    pub async fn sync_once(&self) -> Result<usize> {
        let now = now_secs();
        let mut created = 0;
        for date in diary_dates(now) {
            match self.sync_date(&date, now).await {
                Ok(n) => created += n,
                Err(e) => warn!(date = %date, "[DIARY] sync failed: {e}"),
            }
        }
        if created > 0 {
            info!("[DIARY] {created} new matches");
        }
        Ok(created)
    }

    pub async fn sync_date(&self, date: &str, now: i64) -> Result<usize> {
        let results = self.provider.get(DIARY_ENDPOINT, &[("date", date)]).await?;

        let mut seen = 0;
        let mut created = 0;
        for mut m in entries(&results).into_iter().filter_map(parse_diary_entry) {
            seen += 1;
            if let Some(status) = MatchStatus::from_id(m.status_id) {
                m.status_id = guard_status(status, m.match_time, now).id();
            }
            if self.repo.insert_if_absent(&m, now).await? {
                created += 1;
            }
        }
        debug!(date, seen, created, "[DIARY] date synced");
        Ok(created)
    }
}

/// `YYYYMMDD` for the UTC day containing `now` and the day after.
pub fn diary_dates(now: i64) -> Vec<String> {
    let Some(today) = DateTime::from_timestamp(now, 0) else {
        return Vec::new();
    };
    [today, today + ChronoDuration::days(1)]
        .iter()
        .map(|d| d.format("%Y%m%d").to_string())
        .collect()
}
