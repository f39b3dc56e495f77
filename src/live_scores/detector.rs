use chrono::{DateTime, Utc};

use crate::db::models::{EventKind, MatchEvent, MatchSnapshot, MatchStatus};

/// Minute at which the first half is considered over.
const HALFTIME_MINUTE: u32 = 45;

/// Derive the events implied by moving from `prev` to `curr`.
///
/// Pure and deterministic. Events come out in a fixed order:
/// start / status change, home goal, away goal, score update, half-time.
///
/// First sight of an already-live match counts as its start, and a score
/// jump of several goals between two polls yields a single goal event per
/// side.
pub fn detect(
    prev: Option<&MatchSnapshot>,
    curr: &MatchSnapshot,
    emitted_at: DateTime<Utc>,
) -> Vec<MatchEvent> {
    detect_kinds(prev, curr)
        .into_iter()
        .map(|kind| MatchEvent {
            match_id: curr.match_id,
            kind,
            snapshot: curr.clone(),
            emitted_at,
        })
        .collect()
}

/// Event kinds only, in emission order.
pub fn detect_kinds(prev: Option<&MatchSnapshot>, curr: &MatchSnapshot) -> Vec<EventKind> {
    let mut kinds = Vec::new();

    let prev = match prev {
        Some(p) => p,
        None => {
            if curr.status.is_live() {
                kinds.push(EventKind::MatchStarted);
            }
            return kinds;
        }
    };

    if prev.status != curr.status {
        kinds.push(EventKind::StatusChange);
        match curr.status {
            MatchStatus::Live => kinds.push(EventKind::MatchStarted),
            MatchStatus::Finished => kinds.push(EventKind::Fulltime),
            _ => {}
        }
    }

    if curr.home_score > prev.home_score {
        kinds.push(EventKind::GoalHome);
    }
    if curr.away_score > prev.away_score {
        kinds.push(EventKind::GoalAway);
    }
    if curr.home_score != prev.home_score || curr.away_score != prev.away_score {
        kinds.push(EventKind::ScoreUpdate);
    }

    if let (Some(before), Some(now)) = (prev.minute, curr.minute) {
        if before < HALFTIME_MINUTE && now >= HALFTIME_MINUTE {
            kinds.push(EventKind::Halftime);
        }
    }

    kinds
}
