/// Wall clock, epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// Match status
// ---------------------------------------------------------------------------

/// Provider status codes. The numeric value is what gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStatus {
    Abnormal,
    NotStarted,
    FirstHalf,
    HalfTime,
    SecondHalf,
    Overtime,
    /// Older feeds still send this for extra time.
    OvertimeLegacy,
    Penalties,
    Ended,
    Delayed,
    Interrupted,
    CutInHalf,
    Cancelled,
    ToBeDetermined,
}

impl MatchStatus {
    pub const LIVE_IDS: [i64; 6] = [2, 3, 4, 5, 6, 7];

    pub fn from_id(id: i64) -> Option<Self> {
        let status = match id {
            0 => MatchStatus::Abnormal,
            1 => MatchStatus::NotStarted,
            2 => MatchStatus::FirstHalf,
            3 => MatchStatus::HalfTime,
            4 => MatchStatus::SecondHalf,
            5 => MatchStatus::Overtime,
            6 => MatchStatus::OvertimeLegacy,
            7 => MatchStatus::Penalties,
            8 => MatchStatus::Ended,
            9 => MatchStatus::Delayed,
            10 => MatchStatus::Interrupted,
            11 => MatchStatus::CutInHalf,
            12 => MatchStatus::Cancelled,
            13 => MatchStatus::ToBeDetermined,
            _ => return None,
        };
        Some(status)
    }

    pub fn id(self) -> i64 {
        match self {
            MatchStatus::Abnormal => 0,
            MatchStatus::NotStarted => 1,
            MatchStatus::FirstHalf => 2,
            MatchStatus::HalfTime => 3,
            MatchStatus::SecondHalf => 4,
            MatchStatus::Overtime => 5,
            MatchStatus::OvertimeLegacy => 6,
            MatchStatus::Penalties => 7,
            MatchStatus::Ended => 8,
            MatchStatus::Delayed => 9,
            MatchStatus::Interrupted => 10,
            MatchStatus::CutInHalf => 11,
            MatchStatus::Cancelled => 12,
            MatchStatus::ToBeDetermined => 13,
        }
    }

    /// Which kickoff column a current-half kickoff belongs to, if any.
    pub fn kickoff_half(self) -> Option<Half> {
        match self {
            MatchStatus::FirstHalf => Some(Half::First),
            MatchStatus::SecondHalf => Some(Half::Second),
            MatchStatus::Overtime | MatchStatus::OvertimeLegacy => Some(Half::Overtime),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchStatus::Abnormal => "abnormal",
            MatchStatus::NotStarted => "not_started",
            MatchStatus::FirstHalf => "first_half",
            MatchStatus::HalfTime => "half_time",
            MatchStatus::SecondHalf => "second_half",
            MatchStatus::Overtime => "overtime",
            MatchStatus::OvertimeLegacy => "overtime_legacy",
            MatchStatus::Penalties => "penalties",
            MatchStatus::Ended => "ended",
            MatchStatus::Delayed => "delayed",
            MatchStatus::Interrupted => "interrupted",
            MatchStatus::CutInHalf => "cut_in_half",
            MatchStatus::Cancelled => "cancelled",
            MatchStatus::ToBeDetermined => "to_be_determined",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    First,
    Second,
    Overtime,
}

// ---------------------------------------------------------------------------
// Provider snapshot of one match
// ---------------------------------------------------------------------------

/// Per-side counters. `None` means the provider did not send the value,
/// in which case the stored column is left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideCounters {
    pub red_cards: Option<i64>,
    pub yellow_cards: Option<i64>,
    pub corners: Option<i64>,
}

/// Live state of exactly one match, decoded from a provider payload entry
/// whose id matched the requested one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    pub external_id: String,
    pub status: MatchStatus,
    pub home_score: i64,
    pub away_score: i64,
    pub home: SideCounters,
    pub away: SideCounters,
    /// Kickoff of the half currently being played, epoch seconds.
    pub kickoff_ts: Option<i64>,
    /// Provider-side last-modified watermark, epoch seconds.
    pub provider_update_time: Option<i64>,
}

/// Kickoff values to offer to the write-once columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KickoffCandidates {
    pub first_half: Option<i64>,
    pub second_half: Option<i64>,
    pub overtime: Option<i64>,
}

// ---------------------------------------------------------------------------
// Reconcile result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileVerdict {
    Applied,
    /// Watermark not fresher than the stored one.
    Stale,
    /// Payload had no entry with the requested id.
    NotInPayload,
    /// Entry found but unusable (unknown status, missing score).
    Malformed,
    /// No local row for this id.
    UnknownMatch,
    /// Passed the pre-check but a concurrent write advanced the watermark first.
    RaceLost,
}

impl std::fmt::Display for ReconcileVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReconcileVerdict::Applied => "applied",
            ReconcileVerdict::Stale => "stale",
            ReconcileVerdict::NotInPayload => "not_in_payload",
            ReconcileVerdict::Malformed => "malformed",
            ReconcileVerdict::UnknownMatch => "unknown_match",
            ReconcileVerdict::RaceLost => "race_lost",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub external_id: String,
    pub applied: bool,
    pub row_count: u64,
    pub status: Option<MatchStatus>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub provider_update_time: Option<i64>,
    pub verdict: ReconcileVerdict,
}

impl ReconcileOutcome {
    /// Nothing was written and nothing is known about the match.
    pub fn absent(external_id: &str, verdict: ReconcileVerdict) -> Self {
        Self {
            external_id: external_id.to_string(),
            applied: false,
            row_count: 0,
            status: None,
            home_score: None,
            away_score: None,
            provider_update_time: None,
            verdict,
        }
    }
}

// ---------------------------------------------------------------------------
// Scan / finalize reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub candidates: usize,
    pub fixed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Statistics,
    Incidents,
    Trend,
    PlayerStatistics,
    Standings,
}

impl Dataset {
    pub const ALL: [Dataset; 5] = [
        Dataset::Statistics,
        Dataset::Incidents,
        Dataset::Trend,
        Dataset::PlayerStatistics,
        Dataset::Standings,
    ];
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Dataset::Statistics => "statistics",
            Dataset::Incidents => "incidents",
            Dataset::Trend => "trend",
            Dataset::PlayerStatistics => "player_statistics",
            Dataset::Standings => "standings",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetStatus {
    AlreadyPresent,
    Persisted,
    /// Provider has nothing for this match yet; a later batch retries.
    NotAvailable,
    /// Not applicable to this match (e.g. standings without a season).
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    pub external_id: String,
    pub datasets: Vec<(Dataset, DatasetStatus)>,
}

impl FinalizeReport {
    pub fn status_of(&self, dataset: Dataset) -> Option<&DatasetStatus> {
        self.datasets.iter().find(|(d, _)| *d == dataset).map(|(_, s)| s)
    }

    pub fn failures(&self) -> usize {
        self.datasets
            .iter()
            .filter(|(_, s)| matches!(s, DatasetStatus::Failed(_)))
            .count()
    }
}
