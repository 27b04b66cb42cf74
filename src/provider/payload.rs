//! Decoding of provider payloads.
//!
//! The `results` member of a provider envelope comes in three shapes
//! depending on the endpoint and the provider's mood: an array of entries,
//! a map whose values are arrays of entries, or a single entry object.
//! Entries are located by id only. A missing id is reported as missing,
//! never substituted with another entry.

use serde::Deserialize;
use serde_json::Value;

use crate::db::models::NewMatch;
use crate::error::ProviderError;
use crate::types::{MatchSnapshot, MatchStatus, SideCounters};

/// `{ code, results, err? }`
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub results: Value,
    #[serde(default)]
    pub err: Option<Value>,
}

impl Envelope {
    /// Unwrap `results`, turning a non-zero `code` into a classified error.
    pub fn into_results(self) -> Result<Value, ProviderError> {
        let code = self.code.unwrap_or(0);
        if code == 0 {
            return Ok(self.results);
        }
        let message = match self.err {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Err(match code {
            401 | 403 => ProviderError::Auth(message),
            429 => ProviderError::RateLimited { retry_after: None },
            500..=599 => ProviderError::Server { status: code as u16 },
            _ => ProviderError::Api { code, message },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLookup {
    Found(MatchSnapshot),
    NotInPayload,
    /// An entry with the id exists but could not be decoded.
    Malformed,
}

/// Locate the snapshot for `external_id` in `results`.
pub fn decode_snapshot(results: &Value, external_id: &str) -> SnapshotLookup {
    match find_entry(results, external_id) {
        None => SnapshotLookup::NotInPayload,
        Some(entry) => match parse_snapshot(entry, external_id) {
            Some(snapshot) => SnapshotLookup::Found(snapshot),
            None => SnapshotLookup::Malformed,
        },
    }
}

/// Find the entry whose `id` equals `external_id`, whatever the shape.
pub fn find_entry<'a>(results: &'a Value, external_id: &str) -> Option<&'a Value> {
    match results {
        Value::Array(items) => items.iter().find(|e| id_matches(e, external_id)),
        Value::Object(map) if map.contains_key("id") => {
            id_matches(results, external_id).then_some(results)
        }
        Value::Object(map) => map.values().find_map(|v| match v {
            Value::Array(_) => find_entry(v, external_id),
            Value::Object(inner) if inner.contains_key("id") => {
                id_matches(v, external_id).then_some(v)
            }
            _ => None,
        }),
        _ => None,
    }
}

/// All entries of `results`, flattened across the three shapes.
pub fn entries(results: &Value) -> Vec<&Value> {
    match results {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if map.contains_key("id") => vec![results],
        Value::Object(map) => map
            .values()
            .flat_map(|v| match v {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                Value::Object(inner) if inner.contains_key("id") => vec![v],
                _ => Vec::new(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn id_matches(entry: &Value, external_id: &str) -> bool {
    entry.get("id").and_then(as_id).as_deref() == Some(external_id)
}

fn as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integers arrive as numbers or numeric strings.
fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn field_i64(entry: &Value, key: &str) -> Option<i64> {
    entry.get(key).and_then(as_i64)
}

/// Positive epoch seconds; millisecond values are scaled down.
fn epoch_secs(v: Option<i64>) -> Option<i64> {
    match v {
        Some(ts) if ts > 100_000_000_000 => Some(ts / 1000),
        Some(ts) if ts > 0 => Some(ts),
        _ => None,
    }
}

/// Decode one entry. Accepts the compact `score` array form
/// `[id, status_id, [home...], [away...], kickoff_ts, ...]` where each side is
/// `[score, half_score, red, yellow, corners, overtime_score, penalty_score]`,
/// and the flat form with named fields.
pub fn parse_snapshot(entry: &Value, external_id: &str) -> Option<MatchSnapshot> {
    let provider_update_time =
        epoch_secs(field_i64(entry, "update_time").or_else(|| field_i64(entry, "updated_at")));

    if let Some(score) = entry.get("score").and_then(|s| s.as_array()) {
        let status = MatchStatus::from_id(as_i64(score.get(1)?)?)?;
        let (home_score, home) = parse_side(score.get(2)?)?;
        let (away_score, away) = parse_side(score.get(3)?)?;
        return Some(MatchSnapshot {
            external_id: external_id.to_string(),
            status,
            home_score,
            away_score,
            home,
            away,
            kickoff_ts: epoch_secs(score.get(4).and_then(as_i64)),
            provider_update_time,
        });
    }

    let status = MatchStatus::from_id(field_i64(entry, "status_id")?)?;
    Some(MatchSnapshot {
        external_id: external_id.to_string(),
        status,
        home_score: field_i64(entry, "home_score")?,
        away_score: field_i64(entry, "away_score")?,
        home: SideCounters {
            red_cards: field_i64(entry, "home_red_cards"),
            yellow_cards: field_i64(entry, "home_yellow_cards"),
            corners: field_i64(entry, "home_corners"),
        },
        away: SideCounters {
            red_cards: field_i64(entry, "away_red_cards"),
            yellow_cards: field_i64(entry, "away_yellow_cards"),
            corners: field_i64(entry, "away_corners"),
        },
        kickoff_ts: epoch_secs(field_i64(entry, "kickoff_timestamp")),
        provider_update_time,
    })
}

fn parse_side(side: &Value) -> Option<(i64, SideCounters)> {
    let arr = side.as_array()?;
    let regular = as_i64(arr.first()?)?;
    let at = |i: usize| arr.get(i).and_then(as_i64);
    // Once extra time starts the overtime column carries the running total.
    let score = match at(5) {
        Some(ot) if ot > regular => ot,
        _ => regular,
    };
    Some((
        score,
        SideCounters { red_cards: at(2), yellow_cards: at(3), corners: at(4) },
    ))
}

/// Schedule entry from the diary feed. Entries without an id or a kickoff
/// time (teams, competitions sharing the same payload) are ignored.
pub fn parse_diary_entry(entry: &Value) -> Option<NewMatch> {
    let external_id = entry.get("id").and_then(as_id)?;
    let match_time = epoch_secs(field_i64(entry, "match_time"))?;
    let text = |key: &str| entry.get(key).and_then(as_id);
    Some(NewMatch {
        external_id,
        match_time,
        status_id: field_i64(entry, "status_id")
            .filter(|id| MatchStatus::from_id(*id).is_some())
            .unwrap_or(MatchStatus::NotStarted.id()),
        season_id: text("season_id"),
        competition_id: text("competition_id"),
        home_team_id: text("home_team_id"),
        away_team_id: text("away_team_id"),
    })
}

/// Whether a results value carries anything worth persisting.
pub fn is_empty_results(results: &Value) -> bool {
    match results {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
