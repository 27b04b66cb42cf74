use tracing::{debug, info};

use crate::config::WatchdogConfig;
use crate::db::MatchRepository;
use crate::error::Result;
use crate::jobs::{log_provider_health, reconcile_each};
use crate::reconciler::MatchReconciler;
use crate::types::{now_secs, ScanReport};

/// Finds matches still NOT_STARTED well after kickoff and asks the
/// provider what actually happened to them. Never sets a status itself.
pub struct WatchdogScanner {
    reconciler: MatchReconciler,
    repo: MatchRepository,
    cfg: WatchdogConfig,
}

impl WatchdogScanner {
    pub fn new(reconciler: MatchReconciler, repo: MatchRepository, cfg: WatchdogConfig) -> Self {
        Self { reconciler, repo, cfg }
    }

    pub async fn scan_once(&self) -> Result<ScanReport> {
        let ids = self
            .repo
            .should_be_live(now_secs(), self.cfg.grace_secs, self.cfg.lookback_secs, self.cfg.batch_size)
            .await?;
        if ids.is_empty() {
            debug!("[WATCHDOG] no stuck matches");
            return Ok(ScanReport::default());
        }

        let report = reconcile_each(&self.reconciler, &ids, self.cfg.call_delay, "[WATCHDOG]").await;
        info!(
            "[WATCHDOG] scan complete: candidates={} fixed={} skipped={} errors={}",
            report.candidates, report.fixed, report.skipped, report.errors
        );
        log_provider_health(&self.reconciler, "[WATCHDOG]");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DETAIL_LIVE_ENDPOINT;
    use crate::testing::{
        envelope, memory_pool, new_match, provider_client, provider_config, watchdog_config,
        MockProvider, MockReply,
    };
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn one_timeout_does_not_abort_the_batch() {
        let mock = MockProvider::start().await;
        let repo = MatchRepository::new(memory_pool().await);
        let mut pcfg = provider_config(&mock.base_url);
        pcfg.timeout = Duration::from_millis(300);
        let reconciler = MatchReconciler::new(provider_client(&pcfg), repo.clone(), 5);

        let now = now_secs();
        for i in 0..50 {
            let id = format!("m{i:02}");
            repo.insert_if_absent(&new_match(&id, now - 300 - i * 60), now - 86_400).await.unwrap();

            let reply = match i {
                7 => MockReply::Delayed(
                    Duration::from_secs(2),
                    envelope(json!([{"id": id, "status_id": 2, "home_score": 0, "away_score": 0}])),
                ),
                // Provider agrees the match has not started.
                3 | 13 | 23 | 33 | 43 => MockReply::Json(envelope(
                    json!([{"id": id, "status_id": 1, "home_score": 0, "away_score": 0}]),
                )),
                // Wrong entry only.
                20 => MockReply::Json(envelope(
                    json!([{"id": "other", "status_id": 8, "home_score": 0, "away_score": 0}]),
                )),
                _ => MockReply::Json(envelope(
                    json!([{"id": id, "status_id": 2, "home_score": 1, "away_score": 0}]),
                )),
            };
            mock.reply(DETAIL_LIVE_ENDPOINT, Some(&id), reply);
        }

        let watchdog = WatchdogScanner::new(reconciler, repo.clone(), watchdog_config());
        let report = watchdog.scan_once().await.unwrap();

        assert_eq!(report.candidates, 50);
        assert_eq!(report.errors, 1);
        assert_eq!(report.skipped, 6);
        assert_eq!(report.fixed, 43);
        assert_eq!(report.fixed + report.skipped + report.errors, 50);

        assert_eq!(repo.get("m07").await.unwrap().unwrap().status_id, 1);
        assert_eq!(repo.get("m20").await.unwrap().unwrap().status_id, 1);
        assert_eq!(repo.get("m49").await.unwrap().unwrap().status_id, 2);
    }

    #[tokio::test]
    async fn matches_outside_the_window_are_left_alone() {
        let mock = MockProvider::start().await;
        let repo = MatchRepository::new(memory_pool().await);
        let reconciler =
            MatchReconciler::new(provider_client(&provider_config(&mock.base_url)), repo.clone(), 5);

        let now = now_secs();
        repo.insert_if_absent(&new_match("fresh", now - 30), now).await.unwrap();
        repo.insert_if_absent(&new_match("ancient", now - 3 * 86_400), now).await.unwrap();

        let watchdog = WatchdogScanner::new(reconciler, repo, watchdog_config());
        assert_eq!(watchdog.scan_once().await.unwrap(), ScanReport::default());
        assert_eq!(mock.hits(DETAIL_LIVE_ENDPOINT), 0);
    }
}
