use std::time::Duration;

use tracing::{debug, info};

use crate::db::MatchRepository;
use crate::error::Result;
use crate::jobs::{log_provider_health, reconcile_each};
use crate::reconciler::MatchReconciler;
use crate::types::ScanReport;

/// Keeps in-play matches moving until the provider reports them ENDED.
pub struct LiveRefresher {
    reconciler: MatchReconciler,
    repo: MatchRepository,
    call_delay: Duration,
}

impl LiveRefresher {
    pub fn new(reconciler: MatchReconciler, repo: MatchRepository, call_delay: Duration) -> Self {
        Self { reconciler, repo, call_delay }
    }

    pub async fn refresh_once(&self) -> Result<ScanReport> {
        let ids = self.repo.live_match_ids().await?;
        if ids.is_empty() {
            debug!("[LIVE] no matches in play");
            return Ok(ScanReport::default());
        }

        let report = reconcile_each(&self.reconciler, &ids, self.call_delay, "[LIVE]").await;
        info!(
            "[LIVE] refreshed {} matches: updated={} unchanged={} errors={}",
            report.candidates, report.fixed, report.skipped, report.errors
        );
        log_provider_health(&self.reconciler, "[LIVE]");
        Ok(report)
    }
}
