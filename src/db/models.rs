//! Row types for the `matches` table (see migrations/0001_matches.sql).

use crate::types::{KickoffCandidates, MatchStatus, SideCounters};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MatchRow {
    pub external_id: String,
    pub season_id: Option<String>,
    pub status_id: i64,
    pub match_time: i64,
    pub provider_update_time: Option<i64>,
    pub last_event_ts: Option<i64>,
    pub first_half_kickoff_ts: Option<i64>,
    pub second_half_kickoff_ts: Option<i64>,
    pub overtime_kickoff_ts: Option<i64>,
    pub home_score: i64,
    pub away_score: i64,
    pub home_red_cards: i64,
    pub away_red_cards: i64,
    pub home_yellow_cards: i64,
    pub away_yellow_cards: i64,
    pub home_corners: i64,
    pub away_corners: i64,
    pub updated_at: i64,
}

impl MatchRow {
    pub fn status(&self) -> Option<MatchStatus> {
        MatchStatus::from_id(self.status_id)
    }
}

/// A match first seen on the schedule feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMatch {
    pub external_id: String,
    pub match_time: i64,
    pub status_id: i64,
    pub season_id: Option<String>,
    pub competition_id: Option<String>,
    pub home_team_id: Option<String>,
    pub away_team_id: Option<String>,
}

/// Everything the conditional apply writes for one match.
#[derive(Debug, Clone)]
pub struct MatchUpdate<'a> {
    pub external_id: &'a str,
    pub status: MatchStatus,
    pub home_score: i64,
    pub away_score: i64,
    pub home: SideCounters,
    pub away: SideCounters,
    pub kickoffs: KickoffCandidates,
    /// Provider watermark carried by the snapshot, if any.
    pub provider_update_time: Option<i64>,
    /// Local ingestion time, epoch seconds.
    pub ingested_at: i64,
    pub dedupe_window_secs: i64,
}
