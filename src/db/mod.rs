use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

pub mod models;
use models::*;

/// Durable sink for detected events and latest match state.
///
/// `append_event` is an append-only audit trail; `upsert_snapshot` keeps one
/// row per match.
pub trait PersistenceGateway: Send + Sync {
    /// Append an event record. Re-appending an already stored event is a no-op
    /// and returns `Ok(false)`.
    fn append_event(&self, event: &MatchEvent) -> Result<bool>;

    /// Replace the stored snapshot for `snapshot.match_id`.
    fn upsert_snapshot(&self, snapshot: &MatchSnapshot) -> Result<()>;

    fn list_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<MatchSnapshot>>;
}

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub fn get_snapshot(&self, match_id: MatchId) -> Result<Option<MatchSnapshot>> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                "SELECT match_id, home_team, away_team, status, home_score, away_score,
                        minute, competition, observed_at
                 FROM match_snapshots WHERE match_id = ?1",
                params![match_id],
                map_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// List the most recent events, newest first
    pub fn list_recent_events(&self, limit: i64) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, match_id, kind, observed_at, emitted_at, payload
             FROM match_events ORDER BY id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit], map_stored_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn count_events(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM match_events", [], |r| r.get(0))?;
        Ok(count)
    }
}

impl PersistenceGateway for Database {
    fn append_event(&self, event: &MatchEvent) -> Result<bool> {
        let payload = serde_json::to_string(&event.snapshot)?;
        let conn = self.conn.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO match_events (
                    dedup_key, match_id, kind, observed_at, emitted_at, payload
                 ) VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    event.dedup_key(),
                    event.match_id,
                    event.kind.as_str(),
                    event.snapshot.observed_at,
                    event.emitted_at,
                    payload,
                ],
            )
            .with_context(|| format!("Failed to append {} for match {}", event.kind, event.match_id))?;
        Ok(inserted > 0)
    }

    fn upsert_snapshot(&self, s: &MatchSnapshot) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO match_snapshots (
                match_id, home_team, away_team, status, home_score, away_score,
                minute, competition, observed_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(match_id) DO UPDATE SET
                home_team=excluded.home_team,
                away_team=excluded.away_team,
                status=excluded.status,
                home_score=excluded.home_score,
                away_score=excluded.away_score,
                minute=excluded.minute,
                competition=excluded.competition,
                observed_at=excluded.observed_at,
                updated_at=excluded.updated_at",
            params![
                s.match_id,
                s.home_team,
                s.away_team,
                s.status.as_str(),
                s.home_score,
                s.away_score,
                s.minute,
                s.competition,
                s.observed_at,
                Utc::now(),
            ],
        )
        .with_context(|| format!("Failed to upsert snapshot for match {}", s.match_id))?;
        Ok(())
    }

    fn list_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<MatchSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT match_id, home_team, away_team, status, home_score, away_score,
                    minute, competition, observed_at
             FROM match_snapshots
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR competition = ?2)
             ORDER BY competition, match_id",
        )?;
        let snapshots = stmt
            .query_map(
                params![
                    filter.status.as_ref().map(|s| s.as_str().to_string()),
                    filter.competition,
                ],
                map_snapshot,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }
}

/// A persisted event row as read back for reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub match_id: MatchId,
    pub kind: EventKind,
    pub observed_at: DateTime<Utc>,
    pub emitted_at: DateTime<Utc>,
    pub snapshot: serde_json::Value,
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_snapshot(row: &rusqlite::Row) -> rusqlite::Result<MatchSnapshot> {
    let status: String = row.get(3)?;
    Ok(MatchSnapshot {
        match_id: row.get(0)?,
        home_team: row.get(1)?,
        away_team: row.get(2)?,
        status: MatchStatus::parse(&status),
        home_score: row.get(4)?,
        away_score: row.get(5)?,
        minute: row.get(6)?,
        competition: row.get(7)?,
        observed_at: row.get(8)?,
    })
}

fn map_stored_event(row: &rusqlite::Row) -> rusqlite::Result<StoredEvent> {
    let kind: String = row.get(2)?;
    let kind = EventKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown event kind '{}'", kind).into(),
        )
    })?;
    let payload: String = row.get(5)?;
    Ok(StoredEvent {
        id: row.get(0)?,
        match_id: row.get(1)?,
        kind,
        observed_at: row.get(3)?,
        emitted_at: row.get(4)?,
        snapshot: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS match_snapshots (
    match_id    INTEGER PRIMARY KEY,
    home_team   TEXT    NOT NULL,
    away_team   TEXT    NOT NULL,
    status      TEXT    NOT NULL,
    home_score  INTEGER NOT NULL,
    away_score  INTEGER NOT NULL,
    minute      INTEGER,
    competition TEXT    NOT NULL,
    observed_at TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS match_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    dedup_key   TEXT    NOT NULL UNIQUE,
    match_id    INTEGER NOT NULL,
    kind        TEXT    NOT NULL,
    observed_at TEXT    NOT NULL,
    emitted_at  TEXT    NOT NULL,
    payload     TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_match_events_match ON match_events(match_id);
CREATE INDEX IF NOT EXISTS idx_match_snapshots_status ON match_snapshots(status);
CREATE INDEX IF NOT EXISTS idx_match_snapshots_competition ON match_snapshots(competition);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(id: MatchId, status: MatchStatus, competition: &str) -> MatchSnapshot {
        MatchSnapshot {
            match_id: id,
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            status,
            home_score: 1,
            away_score: 0,
            minute: Some(30),
            competition: competition.into(),
            observed_at: Utc.with_ymd_and_hms(2026, 1, 30, 20, 0, 0).unwrap(),
        }
    }

    fn event(kind: EventKind, snap: MatchSnapshot) -> MatchEvent {
        MatchEvent {
            match_id: snap.match_id,
            kind,
            emitted_at: snap.observed_at,
            snapshot: snap,
        }
    }

    #[test]
    fn test_upsert_replaces_by_match_id() {
        let db = Database::open(":memory:").unwrap();
        let mut s = snapshot(1, MatchStatus::Live, "PL");
        db.upsert_snapshot(&s).unwrap();
        s.home_score = 2;
        s.status = MatchStatus::Finished;
        db.upsert_snapshot(&s).unwrap();

        let all = db.list_snapshots(&SnapshotFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].home_score, 2);
        assert_eq!(all[0].status, MatchStatus::Finished);
        assert_eq!(db.get_snapshot(1).unwrap(), Some(s));
        assert_eq!(db.get_snapshot(2).unwrap(), None);
    }

    #[test]
    fn test_list_snapshots_filters() {
        let db = Database::open(":memory:").unwrap();
        db.upsert_snapshot(&snapshot(1, MatchStatus::Live, "PL")).unwrap();
        db.upsert_snapshot(&snapshot(2, MatchStatus::Scheduled, "PL")).unwrap();
        db.upsert_snapshot(&snapshot(3, MatchStatus::Live, "CL")).unwrap();

        let live = db
            .list_snapshots(&SnapshotFilter {
                status: Some(MatchStatus::Live),
                competition: None,
            })
            .unwrap();
        assert_eq!(live.iter().map(|s| s.match_id).collect::<Vec<_>>(), vec![3, 1]);

        let pl_live = db
            .list_snapshots(&SnapshotFilter {
                status: Some(MatchStatus::Live),
                competition: Some("PL".into()),
            })
            .unwrap();
        assert_eq!(pl_live.len(), 1);
        assert_eq!(pl_live[0].match_id, 1);
    }

    #[test]
    fn test_unknown_status_round_trips() {
        let db = Database::open(":memory:").unwrap();
        db.upsert_snapshot(&snapshot(9, MatchStatus::parse("AWARDED"), "PL"))
            .unwrap();
        let got = db.get_snapshot(9).unwrap().unwrap();
        assert_eq!(got.status, MatchStatus::Unknown("AWARDED".into()));
    }

    #[test]
    fn test_append_event_is_idempotent() {
        let db = Database::open(":memory:").unwrap();
        let ev = event(EventKind::GoalHome, snapshot(1, MatchStatus::Live, "PL"));
        assert!(db.append_event(&ev).unwrap());
        assert!(!db.append_event(&ev).unwrap());
        assert_eq!(db.count_events().unwrap(), 1);

        let other = event(EventKind::ScoreUpdate, snapshot(1, MatchStatus::Live, "PL"));
        assert!(db.append_event(&other).unwrap());

        let recent = db.list_recent_events(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, EventKind::ScoreUpdate);
        assert_eq!(recent[1].kind, EventKind::GoalHome);
        assert_eq!(recent[1].snapshot["home_team"], "Arsenal");
    }
}
