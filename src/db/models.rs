use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// External match identifier as issued by the football-data API.
pub type MatchId = i64;

/// Match status as reported by the remote API.
///
/// Unknown values are preserved verbatim so newer API statuses pass through
/// persistence and export untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Paused,
    Finished,
    Postponed,
    Cancelled,
    Suspended,
    Unknown(String),
}

impl MatchStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" | "TIMED" => MatchStatus::Scheduled,
            "LIVE" | "IN_PLAY" => MatchStatus::Live,
            "PAUSED" => MatchStatus::Paused,
            "FINISHED" => MatchStatus::Finished,
            "POSTPONED" => MatchStatus::Postponed,
            "CANCELLED" | "CANCELED" => MatchStatus::Cancelled,
            "SUSPENDED" => MatchStatus::Suspended,
            _ => MatchStatus::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MatchStatus::Scheduled => "SCHEDULED",
            MatchStatus::Live => "LIVE",
            MatchStatus::Paused => "PAUSED",
            MatchStatus::Finished => "FINISHED",
            MatchStatus::Postponed => "POSTPONED",
            MatchStatus::Cancelled => "CANCELLED",
            MatchStatus::Suspended => "SUSPENDED",
            MatchStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, MatchStatus::Live)
    }
}

impl From<String> for MatchStatus {
    fn from(raw: String) -> Self {
        MatchStatus::parse(&raw)
    }
}

impl From<MatchStatus> for String {
    fn from(status: MatchStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable point-in-time observation of one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub match_id: MatchId,
    pub home_team: String,
    pub away_team: String,
    pub status: MatchStatus,
    pub home_score: u32,
    pub away_score: u32,
    /// Current match minute, when the feed reports one
    pub minute: Option<u32>,
    /// Competition code the match was observed under (e.g. "PL")
    pub competition: String,
    pub observed_at: DateTime<Utc>,
}

/// Discrete change derived from two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MatchStarted,
    GoalHome,
    GoalAway,
    ScoreUpdate,
    Halftime,
    Fulltime,
    StatusChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MatchStarted => "match_started",
            EventKind::GoalHome => "goal_home",
            EventKind::GoalAway => "goal_away",
            EventKind::ScoreUpdate => "score_update",
            EventKind::Halftime => "halftime",
            EventKind::Fulltime => "fulltime",
            EventKind::StatusChange => "status_change",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "match_started" => EventKind::MatchStarted,
            "goal_home" => EventKind::GoalHome,
            "goal_away" => EventKind::GoalAway,
            "score_update" => EventKind::ScoreUpdate,
            "halftime" => EventKind::Halftime,
            "fulltime" => EventKind::Fulltime,
            "status_change" => EventKind::StatusChange,
            _ => return None,
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected match event, carrying the snapshot that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub match_id: MatchId,
    pub kind: EventKind,
    pub snapshot: MatchSnapshot,
    pub emitted_at: DateTime<Utc>,
}

impl MatchEvent {
    /// Stable identity used to make persisted event records idempotent.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.match_id,
            self.kind,
            self.snapshot.observed_at.timestamp_micros()
        )
    }
}

/// Optional filter for snapshot listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotFilter {
    pub status: Option<MatchStatus>,
    pub competition: Option<String>,
}

impl SnapshotFilter {
    pub fn matches(&self, snapshot: &MatchSnapshot) -> bool {
        self.status.as_ref().map_or(true, |s| *s == snapshot.status)
            && self
                .competition
                .as_deref()
                .map_or(true, |c| c == snapshot.competition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_aliases() {
        assert_eq!(MatchStatus::parse("IN_PLAY"), MatchStatus::Live);
        assert_eq!(MatchStatus::parse("TIMED"), MatchStatus::Scheduled);
        assert_eq!(MatchStatus::parse("paused"), MatchStatus::Paused);
    }

    #[test]
    fn test_unknown_status_passes_through() {
        let status = MatchStatus::parse("AWARDED");
        assert_eq!(status, MatchStatus::Unknown("AWARDED".into()));
        assert_eq!(status.as_str(), "AWARDED");

        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"AWARDED\"");
        let back: MatchStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_event_kind_names() {
        for kind in [
            EventKind::MatchStarted,
            EventKind::GoalHome,
            EventKind::GoalAway,
            EventKind::ScoreUpdate,
            EventKind::Halftime,
            EventKind::Fulltime,
            EventKind::StatusChange,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("red_card"), None);
    }
}
