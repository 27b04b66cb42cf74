use sqlx::SqlitePool;

use crate::db::models::{MatchRow, MatchUpdate, NewMatch};
use crate::error::Result;
use crate::types::{Dataset, MatchStatus};

const MATCH_COLUMNS: &str = "external_id, season_id, status_id, match_time, provider_update_time, \
     last_event_ts, first_half_kickoff_ts, second_half_kickoff_ts, overtime_kickoff_ts, \
     home_score, away_score, home_red_cards, away_red_cards, home_yellow_cards, \
     away_yellow_cards, home_corners, away_corners, updated_at";

/// Canonical match rows. No row locks are ever taken: every write that can
/// race carries its own guard predicate.
#[derive(Clone)]
pub struct MatchRepository {
    pool: SqlitePool,
}

impl MatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, external_id: &str) -> Result<Option<MatchRow>> {
        let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE external_id = ?");
        let row = sqlx::query_as::<_, MatchRow>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Create the row for a newly seen match. An existing row is left
    /// untouched, so `match_time` keeps its first value forever.
    pub async fn insert_if_absent(&self, m: &NewMatch, now: i64) -> Result<bool> {
        let done = sqlx::query(
            r#"
            INSERT INTO matches (
                external_id, season_id, competition_id, home_team_id, away_team_id,
                status_id, match_time, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(&m.external_id)
        .bind(m.season_id.as_deref())
        .bind(m.competition_id.as_deref())
        .bind(m.home_team_id.as_deref())
        .bind(m.away_team_id.as_deref())
        .bind(m.status_id)
        .bind(m.match_time)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    /// The single conditional write of live state. Returns rows affected.
    ///
    /// The WHERE clause repeats the freshness rule so that of two racing
    /// updates only the one with the fresher watermark lands:
    /// - with a provider watermark: stored one is NULL or strictly older;
    /// - without: stored ingestion time is NULL or older than the dedupe window.
    ///
    /// Kickoff columns only change while NULL.
    pub async fn apply_update(&self, u: &MatchUpdate<'_>) -> Result<u64> {
        let done = sqlx::query(
            r#"
            UPDATE matches SET
                status_id = ?,
                home_score = ?,
                away_score = ?,
                home_red_cards = COALESCE(?, home_red_cards),
                away_red_cards = COALESCE(?, away_red_cards),
                home_yellow_cards = COALESCE(?, home_yellow_cards),
                away_yellow_cards = COALESCE(?, away_yellow_cards),
                home_corners = COALESCE(?, home_corners),
                away_corners = COALESCE(?, away_corners),
                first_half_kickoff_ts =
                    CASE WHEN first_half_kickoff_ts IS NULL THEN ? ELSE first_half_kickoff_ts END,
                second_half_kickoff_ts =
                    CASE WHEN second_half_kickoff_ts IS NULL THEN ? ELSE second_half_kickoff_ts END,
                overtime_kickoff_ts =
                    CASE WHEN overtime_kickoff_ts IS NULL THEN ? ELSE overtime_kickoff_ts END,
                provider_update_time = CASE
                    WHEN ? IS NULL THEN provider_update_time
                    WHEN provider_update_time IS NULL OR provider_update_time < ? THEN ?
                    ELSE provider_update_time END,
                last_event_ts = CASE
                    WHEN last_event_ts IS NULL OR last_event_ts < ? THEN ?
                    ELSE last_event_ts END,
                updated_at = ?
            WHERE external_id = ?
              AND (
                    (? IS NOT NULL AND (provider_update_time IS NULL OR provider_update_time < ?))
                 OR (? IS NULL AND (last_event_ts IS NULL OR last_event_ts + ? < ?))
              )
            "#,
        )
        .bind(u.status.id())
        .bind(u.home_score)
        .bind(u.away_score)
        .bind(u.home.red_cards)
        .bind(u.away.red_cards)
        .bind(u.home.yellow_cards)
        .bind(u.away.yellow_cards)
        .bind(u.home.corners)
        .bind(u.away.corners)
        .bind(u.kickoffs.first_half)
        .bind(u.kickoffs.second_half)
        .bind(u.kickoffs.overtime)
        .bind(u.provider_update_time)
        .bind(u.provider_update_time)
        .bind(u.provider_update_time)
        .bind(u.ingested_at)
        .bind(u.ingested_at)
        .bind(u.ingested_at)
        .bind(u.external_id)
        .bind(u.provider_update_time)
        .bind(u.provider_update_time)
        .bind(u.provider_update_time)
        .bind(u.dedupe_window_secs)
        .bind(u.ingested_at)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    /// NOT_STARTED matches whose kickoff passed more than `grace_secs` ago
    /// but no longer than `lookback_secs` ago, most recent first.
    pub async fn should_be_live(
        &self,
        now: i64,
        grace_secs: i64,
        lookback_secs: i64,
        limit: i64,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT external_id FROM matches
            WHERE status_id = ?
              AND match_time <= ?
              AND match_time >= ?
            ORDER BY match_time DESC
            LIMIT ?
            "#,
        )
        .bind(MatchStatus::NotStarted.id())
        .bind(now - grace_secs)
        .bind(now - lookback_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Matches currently in play, oldest kickoff first.
    pub async fn live_match_ids(&self) -> Result<Vec<String>> {
        let live = MatchStatus::LIVE_IDS
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT external_id FROM matches WHERE status_id IN ({live}) ORDER BY match_time ASC"
        );
        let ids = sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// ENDED matches within the lookback that still miss at least one
    /// derived dataset, most recently started first.
    pub async fn ended_missing_datasets(
        &self,
        now: i64,
        lookback_secs: i64,
        limit: i64,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT external_id FROM matches
            WHERE status_id = ?
              AND match_time >= ?
              AND (
                    stats_json IS NULL
                 OR incidents_json IS NULL
                 OR trend_json IS NULL
                 OR player_stats_json IS NULL
                 OR (season_id IS NOT NULL AND standings_synced_at IS NULL)
              )
            ORDER BY match_time DESC
            LIMIT ?
            "#,
        )
        .bind(MatchStatus::Ended.id())
        .bind(now - lookback_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn dataset_present(&self, external_id: &str, dataset: Dataset) -> Result<bool> {
        let sql = format!(
            "SELECT {} IS NOT NULL FROM matches WHERE external_id = ?",
            dataset_column(dataset)
        );
        let present = sqlx::query_scalar::<_, bool>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(present.unwrap_or(false))
    }

    /// Write a match-scoped dataset blob once. `false` means it was already
    /// there (a concurrent finalizer got to it first).
    pub async fn store_dataset(
        &self,
        external_id: &str,
        dataset: Dataset,
        payload: &str,
    ) -> Result<bool> {
        let column = dataset_column(dataset);
        let sql = format!(
            "UPDATE matches SET {column} = ? WHERE external_id = ? AND {column} IS NULL"
        );
        let done = sqlx::query(&sql)
            .bind(payload)
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }

    /// Replace the season's standings table and stamp the match as synced.
    pub async fn store_standings(
        &self,
        external_id: &str,
        season_id: &str,
        payload: &str,
        now: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO season_standings (season_id, payload, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(season_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(season_id)
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let done = sqlx::query(
            "UPDATE matches SET standings_synced_at = ? WHERE external_id = ? AND standings_synced_at IS NULL",
        )
        .bind(now)
        .bind(external_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(done.rows_affected() == 1)
    }

    #[cfg(test)]
    pub async fn dataset_payload(&self, external_id: &str, dataset: Dataset) -> Result<Option<String>> {
        let sql = format!(
            "SELECT CAST({} AS TEXT) FROM matches WHERE external_id = ?",
            dataset_column(dataset)
        );
        let payload = sqlx::query_scalar::<_, Option<String>>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payload.flatten())
    }

    #[cfg(test)]
    pub async fn standings_for(&self, season_id: &str) -> Result<Option<String>> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM season_standings WHERE season_id = ?",
        )
        .bind(season_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload)
    }
}

fn dataset_column(dataset: Dataset) -> &'static str {
    match dataset {
        Dataset::Statistics => "stats_json",
        Dataset::Incidents => "incidents_json",
        Dataset::Trend => "trend_json",
        Dataset::PlayerStatistics => "player_stats_json",
        Dataset::Standings => "standings_synced_at",
    }
}
