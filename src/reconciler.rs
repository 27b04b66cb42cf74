use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DETAIL_LIVE_ENDPOINT;
use crate::db::models::{MatchRow, MatchUpdate};
use crate::db::MatchRepository;
use crate::error::Result;
use crate::provider::payload::{decode_snapshot, SnapshotLookup};
use crate::provider::ProviderClient;
use crate::types::{
    now_secs, Half, KickoffCandidates, MatchStatus, ReconcileOutcome, ReconcileVerdict,
};

/// Pulls the live state of one match from the provider and applies it to the
/// stored row if, and only if, it is fresher than what is already there.
#[derive(Clone)]
pub struct MatchReconciler {
    provider: Arc<ProviderClient>,
    repo: MatchRepository,
    dedupe_window_secs: i64,
    ended_tx: Option<mpsc::Sender<String>>,
}

impl MatchReconciler {
    pub fn new(provider: Arc<ProviderClient>, repo: MatchRepository, dedupe_window_secs: i64) -> Self {
        Self { provider, repo, dedupe_window_secs, ended_tx: None }
    }

    /// Matches that reach ENDED are pushed on `tx` for the finalizer.
    pub fn with_ended_notifier(mut self, tx: mpsc::Sender<String>) -> Self {
        self.ended_tx = Some(tx);
        self
    }

    pub fn provider(&self) -> &Arc<ProviderClient> {
        &self.provider
    }

    pub async fn reconcile_match(&self, external_id: &str) -> Result<ReconcileOutcome> {
        self.reconcile_match_at(external_id, now_secs()).await
    }

    /// Reconcile with an explicit ingestion time (epoch seconds).
    ///
    /// Provider errors are returned as-is; retries already happened inside
    /// the client.
    pub async fn reconcile_match_at(&self, external_id: &str, now: i64) -> Result<ReconcileOutcome> {
        let Some(row) = self.repo.get(external_id).await? else {
            debug!(match_id = external_id, "no local row, nothing to reconcile");
            return Ok(ReconcileOutcome::absent(external_id, ReconcileVerdict::UnknownMatch));
        };

        let results = self
            .provider
            .get(DETAIL_LIVE_ENDPOINT, &[("match_id", external_id)])
            .await?;

        let snapshot = match decode_snapshot(&results, external_id) {
            SnapshotLookup::Found(s) => s,
            SnapshotLookup::NotInPayload => {
                debug!(match_id = external_id, "match not present in detail_live payload");
                return Ok(ReconcileOutcome::absent(external_id, ReconcileVerdict::NotInPayload));
            }
            SnapshotLookup::Malformed => {
                warn!(match_id = external_id, "detail_live entry could not be decoded");
                return Ok(ReconcileOutcome::absent(external_id, ReconcileVerdict::Malformed));
            }
        };

        if !is_fresher(&row, snapshot.provider_update_time, now, self.dedupe_window_secs) {
            debug!(
                match_id = external_id,
                incoming = ?snapshot.provider_update_time,
                stored = ?row.provider_update_time,
                "stale snapshot skipped"
            );
            return Ok(stored_outcome(&row, ReconcileVerdict::Stale));
        }

        let status = guard_status(snapshot.status, row.match_time, now);
        if status != snapshot.status {
            warn!(
                match_id = external_id,
                match_time = row.match_time,
                "provider reported ENDED before scheduled kickoff, keeping NOT_STARTED"
            );
        }

        let update = MatchUpdate {
            external_id,
            status,
            home_score: snapshot.home_score,
            away_score: snapshot.away_score,
            home: snapshot.home,
            away: snapshot.away,
            kickoffs: kickoff_candidates(status, snapshot.kickoff_ts, now),
            provider_update_time: snapshot.provider_update_time,
            ingested_at: now,
            dedupe_window_secs: self.dedupe_window_secs,
        };
        let row_count = self.repo.apply_update(&update).await?;

        let provider_update_time = match (row.provider_update_time, snapshot.provider_update_time) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => new.or(old),
        };
        let verdict = if row_count > 0 {
            ReconcileVerdict::Applied
        } else {
            debug!(match_id = external_id, "conditional update lost to a fresher write");
            ReconcileVerdict::RaceLost
        };

        if row_count > 0 && status != row.status().unwrap_or(MatchStatus::NotStarted) {
            info!(
                match_id = external_id,
                from = row.status_id,
                to = status.id(),
                score = %format!("{}-{}", snapshot.home_score, snapshot.away_score),
                "status changed"
            );
        }
        if row_count > 0 && status == MatchStatus::Ended {
            self.notify_ended(external_id);
        }

        Ok(ReconcileOutcome {
            external_id: external_id.to_string(),
            applied: row_count > 0,
            row_count,
            status: Some(status),
            home_score: Some(snapshot.home_score),
            away_score: Some(snapshot.away_score),
            provider_update_time,
            verdict,
        })
    }

    fn notify_ended(&self, external_id: &str) {
        let Some(tx) = &self.ended_tx else { return };
        match tx.try_send(external_id.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(match_id = external_id, "finalizer queue full, leaving match to the periodic batch");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(match_id = external_id, "finalizer queue closed");
            }
        }
    }
}

/// Strictly-fresher rule. The same predicate is repeated in the UPDATE.
pub fn is_fresher(row: &MatchRow, incoming_put: Option<i64>, now: i64, window_secs: i64) -> bool {
    match incoming_put {
        Some(put) => row.provider_update_time.map_or(true, |stored| put > stored),
        None => row.last_event_ts.map_or(true, |last| now > last + window_secs),
    }
}

/// A match cannot have ended before it was scheduled to start.
pub fn guard_status(status: MatchStatus, match_time: i64, now: i64) -> MatchStatus {
    if status == MatchStatus::Ended && match_time > now {
        MatchStatus::NotStarted
    } else {
        status
    }
}

/// Attribute the current-half kickoff to its column. Without a provider
/// value the ingestion time stands in; the write-once columns keep whichever
/// value lands first.
pub fn kickoff_candidates(status: MatchStatus, kickoff_ts: Option<i64>, now: i64) -> KickoffCandidates {
    let ts = Some(kickoff_ts.unwrap_or(now));
    match status.kickoff_half() {
        Some(Half::First) => KickoffCandidates { first_half: ts, ..Default::default() },
        Some(Half::Second) => KickoffCandidates { second_half: ts, ..Default::default() },
        Some(Half::Overtime) => KickoffCandidates { overtime: ts, ..Default::default() },
        None => KickoffCandidates::default(),
    }
}

fn stored_outcome(row: &MatchRow, verdict: ReconcileVerdict) -> ReconcileOutcome {
    ReconcileOutcome {
        external_id: row.external_id.clone(),
        applied: false,
        row_count: 0,
        status: row.status(),
        home_score: Some(row.home_score),
        away_score: Some(row.away_score),
        provider_update_time: row.provider_update_time,
        verdict,
    }
}
