//! Decoding of football-data.org v4 payloads.
//!
//! Only the fields the poller needs are read; everything else is ignored so
//! new API fields never break decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::db::models::{MatchSnapshot, MatchStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMatch {
    id: i64,
    status: String,
    #[serde(default)]
    minute: Option<Value>,
    #[serde(default)]
    competition: Option<RawCompetitionRef>,
    home_team: RawTeam,
    away_team: RawTeam,
    #[serde(default)]
    score: Option<RawScore>,
}

#[derive(Debug, Deserialize)]
struct RawCompetitionRef {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTeam {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScore {
    full_time: Option<RawScoreLine>,
}

#[derive(Debug, Deserialize)]
struct RawScoreLine {
    home: Option<u32>,
    away: Option<u32>,
}

/// A competition available to the configured credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Competition {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub area: Option<Area>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Area {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub tla: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub founded: Option<u32>,
    #[serde(default)]
    pub area: Option<Area>,
    #[serde(default)]
    pub running_competitions: Vec<Competition>,
}

/// Decode the `matches` array of a match-list response.
///
/// Entries that cannot be decoded are skipped (and logged) rather than
/// failing the whole list. `fallback_competition` is used when an entry has
/// no competition code.
pub fn parse_matches(
    raw: &Value,
    fallback_competition: &str,
    observed_at: DateTime<Utc>,
) -> Vec<MatchSnapshot> {
    let items = match raw.get("matches").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return vec![],
    };

    items
        .iter()
        .filter_map(|item| match RawMatch::deserialize(item) {
            Ok(m) => Some(to_snapshot(m, fallback_competition, observed_at)),
            Err(e) => {
                debug!("Skipping undecodable match entry: {}", e);
                None
            }
        })
        .collect()
}

/// Decode a single match-detail response.
pub fn parse_match(
    raw: &Value,
    fallback_competition: &str,
    observed_at: DateTime<Utc>,
) -> Option<MatchSnapshot> {
    RawMatch::deserialize(raw)
        .ok()
        .map(|m| to_snapshot(m, fallback_competition, observed_at))
}

pub fn parse_competitions(raw: &Value) -> Vec<Competition> {
    raw.get("competitions")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|c| Competition::deserialize(c).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a team response; `None` when the payload is not a team.
pub fn parse_team(raw: &Value) -> Option<Team> {
    match Team::deserialize(raw) {
        Ok(team) => Some(team),
        Err(e) => {
            debug!("Undecodable team payload: {}", e);
            None
        }
    }
}

fn to_snapshot(m: RawMatch, fallback_competition: &str, observed_at: DateTime<Utc>) -> MatchSnapshot {
    let full_time = m.score.and_then(|s| s.full_time);
    let (home_score, away_score) = full_time
        .map(|ft| (ft.home.unwrap_or(0), ft.away.unwrap_or(0)))
        .unwrap_or((0, 0));

    MatchSnapshot {
        match_id: m.id,
        home_team: m.home_team.name.unwrap_or_else(|| "TBD".to_string()),
        away_team: m.away_team.name.unwrap_or_else(|| "TBD".to_string()),
        status: MatchStatus::parse(&m.status),
        home_score,
        away_score,
        minute: m.minute.as_ref().and_then(parse_minute),
        competition: m
            .competition
            .and_then(|c| c.code)
            .unwrap_or_else(|| fallback_competition.to_string()),
        observed_at,
    }
}

/// Minute arrives as a number or as a string like `"45+2"`; stoppage time is
/// folded into the base minute.
fn parse_minute(v: &Value) -> Option<u32> {
    if let Some(n) = v.as_u64() {
        return u32::try_from(n).ok();
    }
    let s = v.as_str()?.trim().trim_end_matches('\'');
    let base = s.split('+').next()?.trim();
    base.parse().ok()
}
