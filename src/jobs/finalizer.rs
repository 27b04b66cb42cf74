//! Post-match datasets. Each one is fetched and stored independently and at
//! most once: the existence check runs first, and the write itself only
//! lands on a NULL column.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{
    FinalizerConfig, INCIDENTS_ENDPOINT, PLAYER_STATS_ENDPOINT, SEASON_TABLE_ENDPOINT,
    TEAM_STATS_ENDPOINT, TREND_ENDPOINT,
};
use crate::db::models::MatchRow;
use crate::db::MatchRepository;
use crate::error::Result;
use crate::provider::payload::{find_entry, is_empty_results};
use crate::provider::ProviderClient;
use crate::types::{now_secs, Dataset, DatasetStatus, FinalizeReport};

pub struct PostMatchFinalizer {
    provider: Arc<ProviderClient>,
    repo: MatchRepository,
    cfg: FinalizerConfig,
}

impl PostMatchFinalizer {
    pub fn new(provider: Arc<ProviderClient>, repo: MatchRepository, cfg: FinalizerConfig) -> Self {
        Self { provider, repo, cfg }
    }

    pub async fn finalize_match(&self, external_id: &str) -> Result<FinalizeReport> {
        let Some(row) = self.repo.get(external_id).await? else {
            warn!(match_id = external_id, "[FINALIZER] unknown match");
            return Ok(FinalizeReport {
                external_id: external_id.to_string(),
                datasets: Dataset::ALL.iter().map(|d| (*d, DatasetStatus::Skipped)).collect(),
            });
        };

        let mut datasets = Vec::with_capacity(Dataset::ALL.len());
        for dataset in Dataset::ALL {
            let status = match self.finalize_dataset(&row, dataset).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(match_id = external_id, %dataset, "[FINALIZER] dataset failed: {e}");
                    DatasetStatus::Failed(e.to_string())
                }
            };
            datasets.push((dataset, status));
        }

        let report = FinalizeReport { external_id: external_id.to_string(), datasets };
        let persisted = report
            .datasets
            .iter()
            .filter(|(_, s)| *s == DatasetStatus::Persisted)
            .count();
        info!(
            match_id = external_id,
            "[FINALIZER] persisted={} failed={}",
            persisted,
            report.failures()
        );
        Ok(report)
    }

    async fn finalize_dataset(&self, row: &MatchRow, dataset: Dataset) -> Result<DatasetStatus> {
        let id = row.external_id.as_str();
        if self.repo.dataset_present(id, dataset).await? {
            return Ok(DatasetStatus::AlreadyPresent);
        }

        let endpoint = match dataset {
            Dataset::Statistics => TEAM_STATS_ENDPOINT,
            Dataset::Incidents => INCIDENTS_ENDPOINT,
            Dataset::Trend => TREND_ENDPOINT,
            Dataset::PlayerStatistics => PLAYER_STATS_ENDPOINT,
            Dataset::Standings => {
                let Some(season_id) = row.season_id.as_deref() else {
                    return Ok(DatasetStatus::Skipped);
                };
                let results = self
                    .provider
                    .get(SEASON_TABLE_ENDPOINT, &[("season_id", season_id)])
                    .await?;
                if is_empty_results(&results) {
                    return Ok(DatasetStatus::NotAvailable);
                }
                let payload = serde_json::to_string(&results)?;
                return if self.repo.store_standings(id, season_id, &payload, now_secs()).await? {
                    Ok(DatasetStatus::Persisted)
                } else {
                    Ok(DatasetStatus::AlreadyPresent)
                };
            }
        };

        let results = self.provider.get(endpoint, &[("match_id", id)]).await?;
        let Some(entry) = find_entry(&results, id) else {
            debug!(match_id = id, %dataset, "not available yet");
            return Ok(DatasetStatus::NotAvailable);
        };
        let payload = serde_json::to_string(entry)?;
        if self.repo.store_dataset(id, dataset, &payload).await? {
            Ok(DatasetStatus::Persisted)
        } else {
            Ok(DatasetStatus::AlreadyPresent)
        }
    }

    /// Periodic sweep over recently ended matches that still miss data.
    /// Returns how many matches were visited.
    pub async fn finalize_recent(&self) -> Result<usize> {
        let ids = self
            .repo
            .ended_missing_datasets(now_secs(), self.cfg.lookback_secs, self.cfg.batch_size)
            .await?;

        for (i, id) in ids.iter().enumerate() {
            if i > 0 && !self.cfg.match_delay.is_zero() {
                tokio::time::sleep(self.cfg.match_delay).await;
            }
            if let Err(e) = self.finalize_match(id).await {
                error!(match_id = %id, "[FINALIZER] {e}");
            }
        }
        if !ids.is_empty() {
            info!("[FINALIZER] batch done: {} matches", ids.len());
        }
        Ok(ids.len())
    }

    /// Finalize matches as the reconciler reports them ENDED. Returns once
    /// every sender is gone.
    pub async fn consume_ended(&self, mut rx: mpsc::Receiver<String>) {
        while let Some(id) = rx.recv().await {
            if let Err(e) = self.finalize_match(&id).await {
                error!(match_id = %id, "[FINALIZER] {e}");
            }
        }
        debug!("[FINALIZER] ended-match channel closed");
    }
}
