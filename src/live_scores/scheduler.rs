use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::detector::detect;
use super::dispatcher::{EventDispatcher, Subscriber};
use super::export::{write_document, ExportDocument};
use super::store::{CompetitionStatus, MatchStateStore};
use crate::db::models::{MatchId, MatchSnapshot, MatchStatus};
use crate::db::PersistenceGateway;
use crate::football_data::{ApiError, ClientStatus, FootballDataClient};

/// Per-status poll cadence and the spacing between sources within a sweep.
#[derive(Debug, Clone)]
pub struct PollCadence {
    pub live: Duration,
    pub paused: Duration,
    pub scheduled: Duration,
    pub finished: Duration,
    pub inter_source_delay: Duration,
    /// Longest `stop()` waits for the worker before aborting it
    pub stop_timeout: Duration,
}

impl Default for PollCadence {
    fn default() -> Self {
        PollCadence {
            live: Duration::from_secs(15),
            paused: Duration::from_secs(30),
            scheduled: Duration::from_secs(600),
            finished: Duration::from_secs(3600),
            inter_source_delay: Duration::from_secs(7),
            stop_timeout: Duration::from_secs(15),
        }
    }
}

impl PollCadence {
    fn for_status(&self, status: &MatchStatus) -> Option<Duration> {
        match status {
            MatchStatus::Live => Some(self.live),
            MatchStatus::Paused => Some(self.paused),
            MatchStatus::Scheduled => Some(self.scheduled),
            MatchStatus::Finished => Some(self.finished),
            _ => None,
        }
    }
}

/// Delay before the next sweep.
///
/// Any LIVE match forces the live interval. Otherwise the base interval,
/// shortened to the fastest cadence among the observed statuses.
pub fn next_sweep_delay<'a>(
    base: Duration,
    cadence: &PollCadence,
    statuses: impl IntoIterator<Item = &'a MatchStatus>,
) -> Duration {
    let mut delay = base;
    for status in statuses {
        if status.is_live() {
            return cadence.live;
        }
        if let Some(d) = cadence.for_status(status) {
            delay = delay.min(d);
        }
    }
    delay
}

/// Diagnostics for one tracked competition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStatus {
    pub competition: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_match_count: usize,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

struct TrackedSource {
    match_ids: BTreeSet<MatchId>,
    status: SourceStatus,
}

/// Result of polling a single source.
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    pub competition: String,
    pub matches: usize,
    pub live: usize,
    pub events: usize,
    pub statuses: Vec<MatchStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_matches: usize,
    pub live_count: usize,
    pub counts_by_status: BTreeMap<String, usize>,
    pub rate_limiter: ClientStatus,
    pub sources: Vec<SourceStatus>,
    pub running: bool,
    pub sweeps_completed: u64,
    pub subscribers: usize,
    pub halted: Option<String>,
}

enum SweepOutcome {
    Completed(Vec<MatchStatus>),
    Stopped,
    Halted,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

struct SchedulerInner {
    client: FootballDataClient,
    store: MatchStateStore,
    dispatcher: EventDispatcher,
    persistence: Arc<dyn PersistenceGateway>,
    cadence: PollCadence,
    // Registration order is poll order.
    sources: RwLock<Vec<(String, TrackedSource)>>,
    worker: Mutex<Option<Worker>>,
    // Serializes apply() so the store, the snapshot table and published
    // events all see observations in the same order.
    apply_lock: Mutex<()>,
    sweeps: AtomicU64,
    halted: RwLock<Option<String>>,
}

/// Drives periodic sweeps over the tracked competitions and exposes the
/// administrative surface (start/stop, live matches, statistics, export).
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollingScheduler {
    pub fn new(
        client: FootballDataClient,
        persistence: Arc<dyn PersistenceGateway>,
        cadence: PollCadence,
    ) -> Self {
        let dispatcher = EventDispatcher::new(persistence.clone());
        PollingScheduler {
            inner: Arc::new(SchedulerInner {
                client,
                store: MatchStateStore::new(),
                dispatcher,
                persistence,
                cadence,
                sources: RwLock::new(Vec::new()),
                worker: Mutex::new(None),
                apply_lock: Mutex::new(()),
                sweeps: AtomicU64::new(0),
                halted: RwLock::new(None),
            }),
        }
    }

    pub fn store(&self) -> &MatchStateStore {
        &self.inner.store
    }

    pub fn client(&self) -> &FootballDataClient {
        &self.inner.client
    }

    /// Track `competition`. Returns false if it was already tracked.
    pub fn add_source(&self, competition: &str) -> bool {
        let mut sources = self.inner.sources.write();
        if sources.iter().any(|(code, _)| code == competition) {
            return false;
        }
        sources.push((
            competition.to_string(),
            TrackedSource {
                match_ids: BTreeSet::new(),
                status: SourceStatus {
                    competition: competition.to_string(),
                    ..Default::default()
                },
            },
        ));
        true
    }

    pub fn sources(&self) -> Vec<String> {
        self.inner
            .sources
            .read()
            .iter()
            .map(|(code, _)| code.clone())
            .collect()
    }

    pub fn register_subscriber(&self, subscriber: Arc<dyn Subscriber>) {
        self.inner.dispatcher.register(subscriber);
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Launch the background worker. No-op (returns false) if one is running.
    pub fn start(&self, base_interval: Duration) -> bool {
        let mut slot = self.inner.worker.lock();
        if slot.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Polling already running");
            return false;
        }
        *self.inner.halted.write() = None;

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(self.inner.clone(), base_interval, rx));
        *slot = Some(Worker { handle, shutdown });
        info!(
            "Polling started ({} sources, base interval {:?})",
            self.inner.sources.read().len(),
            base_interval
        );
        true
    }

    /// Signal the worker and wait for it to exit.
    ///
    /// The worker notices between sources, so an in-flight fetch may finish
    /// first. Once this returns, no further events are published or
    /// persisted by this scheduler's worker.
    pub async fn stop(&self) -> bool {
        let worker = self.inner.worker.lock().take();
        let Some(Worker {
            mut handle,
            shutdown,
        }) = worker
        else {
            return false;
        };
        let _ = shutdown.send(true);

        let timeout = self.inner.cadence.stop_timeout;
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!("Polling worker did not stop within {:?}, aborting", timeout);
            handle.abort();
            let _ = handle.await;
        }
        info!("Polling stopped");
        true
    }

    /// Poll one competition now, outside the worker loop.
    pub async fn poll_source(&self, competition: &str) -> Result<PollReport, ApiError> {
        self.inner.poll_source(competition).await
    }

    /// Run one full sweep over every tracked source on the caller's task.
    pub async fn sweep_once(&self) -> anyhow::Result<()> {
        let (_keepalive, mut rx) = watch::channel(false);
        match self.inner.sweep(&mut rx).await {
            SweepOutcome::Halted => {
                let reason = self.inner.halted.read().clone().unwrap_or_default();
                anyhow::bail!("polling halted: {}", reason)
            }
            _ => Ok(()),
        }
    }

    pub fn get_live_matches(&self) -> Vec<MatchSnapshot> {
        self.inner.store.live_matches()
    }

    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        self.inner
            .sources
            .read()
            .iter()
            .map(|(_, s)| s.status.clone())
            .collect()
    }

    pub fn get_statistics(&self) -> Statistics {
        let store = &self.inner.store;
        Statistics {
            total_matches: store.len(),
            live_count: store.live_count(),
            counts_by_status: store.counts_by_status(),
            rate_limiter: self.inner.client.rate_limit_status(),
            sources: self.source_statuses(),
            running: self.is_running(),
            sweeps_completed: self.inner.sweeps.load(Ordering::Relaxed),
            subscribers: self.inner.dispatcher.subscriber_count(),
            halted: self.inner.halted.read().clone(),
        }
    }

    /// Per-competition totals for every tracked source, in poll order.
    pub fn competition_statuses(&self) -> Vec<CompetitionStatus> {
        self.sources()
            .iter()
            .map(|code| self.inner.store.competition_status(code))
            .collect()
    }

    pub fn export_document(&self) -> ExportDocument {
        ExportDocument::build(&self.inner.store, &self.sources())
    }

    /// Write a point-in-time export of every current snapshot to `path`.
    pub fn export_snapshot(&self, path: &Path) -> anyhow::Result<ExportDocument> {
        let document = self.export_document();
        write_document(&document, path)
            .with_context(|| format!("Failed to export snapshot to {}", path.display()))?;
        info!(
            "Exported {} matches ({} live) to {}",
            document.total_matches,
            document.live_matches.len(),
            path.display()
        );
        Ok(document)
    }
}

async fn run_worker(
    inner: Arc<SchedulerInner>,
    base_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let statuses = match inner.sweep(&mut shutdown).await {
            SweepOutcome::Completed(statuses) => statuses,
            SweepOutcome::Stopped | SweepOutcome::Halted => break,
        };
        let delay = next_sweep_delay(base_interval, &inner.cadence, &statuses);
        debug!("Sweep done, next in {:?}", delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
    }
    debug!("Polling worker exiting");
}

impl SchedulerInner {
    async fn sweep(&self, shutdown: &mut watch::Receiver<bool>) -> SweepOutcome {
        let codes: Vec<String> = self.sources.read().iter().map(|(c, _)| c.clone()).collect();
        let mut statuses = Vec::new();

        for (i, code) in codes.iter().enumerate() {
            if i > 0 && !self.cadence.inter_source_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.cadence.inter_source_delay) => {}
                    _ = shutdown.changed() => return SweepOutcome::Stopped,
                }
            }
            if *shutdown.borrow() {
                return SweepOutcome::Stopped;
            }

            match self.poll_source(code).await {
                Ok(report) => statuses.extend(report.statuses),
                Err(e) if e.halts_polling() => {
                    error!("Polling halted on {}: {}", code, e);
                    *self.halted.write() = Some(e.to_string());
                    return SweepOutcome::Halted;
                }
                Err(e) => warn!("Poll of {} failed: {}", code, e),
            }
        }

        self.sweeps.fetch_add(1, Ordering::Relaxed);
        SweepOutcome::Completed(statuses)
    }

    async fn poll_source(&self, competition: &str) -> Result<PollReport, ApiError> {
        // Anything last seen live must not be served from cache.
        let force_refresh = self
            .sources
            .read()
            .iter()
            .find(|(code, _)| code == competition)
            .is_some_and(|(_, s)| s.match_ids.iter().any(|id| self.store.is_live(*id)));

        let result = self
            .client
            .competition_matches(competition, None, force_refresh)
            .await;
        let snapshots = match result {
            Ok(s) => s,
            Err(e) => {
                self.record_failure(competition, &e);
                return Err(e);
            }
        };

        let report = self.apply(competition, snapshots);
        info!(
            "{}: {} matches, {} live, {} events",
            competition, report.matches, report.live, report.events
        );
        Ok(report)
    }

    fn apply(&self, competition: &str, snapshots: Vec<MatchSnapshot>) -> PollReport {
        let mut report = PollReport {
            competition: competition.to_string(),
            ..Default::default()
        };
        let mut seen = BTreeSet::new();
        let _guard = self.apply_lock.lock();

        for snapshot in snapshots {
            // Stale observations change nothing: no events, no persistence.
            let Some(prev) = self.store.replace(snapshot.clone()) else {
                continue;
            };

            let events = detect(prev.as_ref(), &snapshot, Utc::now());
            report.events += self.dispatcher.publish(&events).events;

            if let Err(e) = self.persistence.upsert_snapshot(&snapshot) {
                error!("Failed to persist snapshot {}: {:#}", snapshot.match_id, e);
            }
            report.matches += 1;
            if snapshot.status.is_live() {
                report.live += 1;
            }
            report.statuses.push(snapshot.status);
            seen.insert(snapshot.match_id);
        }

        let mut sources = self.sources.write();
        if let Some((_, source)) = sources.iter_mut().find(|(code, _)| code == competition) {
            source.match_ids = seen;
            source.status.last_success_at = Some(Utc::now());
            source.status.last_match_count = report.matches;
            source.status.last_error = None;
            source.status.consecutive_failures = 0;
        }
        report
    }

    fn record_failure(&self, competition: &str, err: &ApiError) {
        let mut sources = self.sources.write();
        if let Some((_, source)) = sources.iter_mut().find(|(code, _)| code == competition) {
            source.status.last_error = Some(err.to_string());
            source.status.consecutive_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MatchEvent;
    use crate::db::Database;
    use crate::football_data::testing::{match_json, matches_body, ok_json, status, FakeTransport};
    use crate::football_data::{ClientConfig, RateLimiterConfig};
    use std::sync::atomic::AtomicUsize;

    fn cadence() -> PollCadence {
        PollCadence {
            inter_source_delay: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn scheduler(transport: Arc<FakeTransport>, sources: &[&str]) -> (PollingScheduler, Arc<Database>) {
        scheduler_with(transport, sources, cadence())
    }

    fn scheduler_with(
        transport: Arc<FakeTransport>,
        sources: &[&str],
        cadence: PollCadence,
    ) -> (PollingScheduler, Arc<Database>) {
        let mut config = ClientConfig::new("test_api_key_12345");
        config.base_url = "http://football.test/v4".into();
        config.backoff_base = Duration::from_millis(10);
        let limiter = RateLimiterConfig {
            capacity: 100,
            refill_period: Duration::from_secs(60),
            min_spacing: Duration::ZERO,
        };
        let client = FootballDataClient::with_transport(config, limiter, transport).unwrap();
        let db = Arc::new(Database::open(":memory:").unwrap());
        let scheduler = PollingScheduler::new(client, db.clone(), cadence);
        for s in sources {
            scheduler.add_source(s);
        }
        (scheduler, db)
    }

    /// One live match whose home score goes up by one on every call.
    fn scoring_transport() -> Arc<FakeTransport> {
        Arc::new(FakeTransport::new(|_, call| {
            ok_json(matches_body(vec![match_json(
                1,
                "IN_PLAY",
                call as u32,
                0,
                Some(10 + call as u32),
                "PL",
            )]))
        }))
    }

    fn live_snapshot(id: MatchId, home: u32, observed_at: DateTime<Utc>) -> MatchSnapshot {
        MatchSnapshot {
            match_id: id,
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            status: MatchStatus::Live,
            home_score: home,
            away_score: 0,
            minute: Some(30),
            competition: "PL".into(),
            observed_at,
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn Subscriber>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub: Arc<dyn Subscriber> = Arc::new(move |_: &MatchEvent| -> anyhow::Result<()> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, sub)
    }

    #[test]
    fn test_next_sweep_delay() {
        let c = PollCadence::default();
        let base = Duration::from_secs(30);
        assert_eq!(next_sweep_delay(base, &c, std::iter::empty()), base);
        assert_eq!(
            next_sweep_delay(base, &c, &[MatchStatus::Scheduled, MatchStatus::Live]),
            c.live
        );
        assert_eq!(
            next_sweep_delay(Duration::from_secs(120), &c, &[MatchStatus::Paused]),
            c.paused
        );
        assert_eq!(
            next_sweep_delay(base, &c, &[MatchStatus::Finished, MatchStatus::Scheduled]),
            base
        );
        assert_eq!(
            next_sweep_delay(base, &c, &[MatchStatus::Unknown("AWARDED".into())]),
            base
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_subscriber_survives_many_sweeps() {
        let (scheduler, db) = scheduler(scoring_transport(), &["PL"]);
        scheduler.register_subscriber(Arc::new(|_: &MatchEvent| -> anyhow::Result<()> {
            anyhow::bail!("always fails")
        }));
        let (count, sub) = counter();
        scheduler.register_subscriber(sub);

        assert!(scheduler.start(Duration::from_secs(30)));
        // Live match: sweeps at 0s, 15s, 30s, 45s.
        tokio::time::sleep(Duration::from_secs(50)).await;

        assert!(scheduler.is_running());
        let stats = scheduler.get_statistics();
        assert!(stats.sweeps_completed >= 3, "{} sweeps", stats.sweeps_completed);
        // MATCH_STARTED, then GOAL_HOME + SCORE_UPDATE per later sweep.
        assert!(count.load(Ordering::SeqCst) >= 5);
        assert_eq!(db.count_events().unwrap() as usize, count.load(Ordering::SeqCst));
        assert_eq!(stats.live_count, 1);
        assert!(scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_happens_after_stop() {
        let (scheduler, db) = scheduler(scoring_transport(), &["PL", "CL"]);
        let (count, sub) = counter();
        scheduler.register_subscriber(sub);

        scheduler.start(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running());

        let delivered = count.load(Ordering::SeqCst);
        let persisted = db.count_events().unwrap();
        assert!(delivered > 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), delivered);
        assert_eq!(db.count_events().unwrap(), persisted);
        assert!(!scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_polled_in_order_and_spaced_until_stop() {
        let started = tokio::time::Instant::now();
        let log: Arc<Mutex<Vec<(String, Duration)>>> = Arc::default();
        let transport = {
            let log = log.clone();
            Arc::new(FakeTransport::new(move |url, _| {
                // /v4/competitions/{code}/matches
                let code = url
                    .path_segments()
                    .and_then(|mut s| s.nth(2))
                    .unwrap_or_default()
                    .to_string();
                log.lock().push((code, started.elapsed()));
                ok_json(matches_body(vec![]))
            }))
        };
        let (scheduler, _db) =
            scheduler_with(transport.clone(), &["PL", "CL", "SA"], PollCadence::default());

        scheduler.start(Duration::from_secs(30));
        // CL is polled at 7s; SA would be due at 14s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(scheduler.stop().await);
        tokio::time::sleep(Duration::from_secs(120)).await;

        let log = log.lock().clone();
        let codes: Vec<&str> = log.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(codes, vec!["PL", "CL"]);
        assert!(log[0].1 < Duration::from_millis(5));
        let gap = log[1].1 - log[0].1;
        assert!(gap >= Duration::from_secs(7), "gap {:?}", gap);
        assert!(gap < Duration::from_millis(7005), "gap {:?}", gap);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(scheduler.get_statistics().sweeps_completed, 0);
    }

    #[test]
    fn test_stale_observation_is_neither_persisted_nor_published() {
        let (scheduler, db) = scheduler(Arc::new(FakeTransport::scripted(vec![status(500)])), &["PL"]);
        let (count, sub) = counter();
        scheduler.register_subscriber(sub);

        let now = Utc::now();
        let newer = live_snapshot(1, 2, now);
        let older = live_snapshot(1, 1, now - chrono::Duration::seconds(30));

        assert_eq!(scheduler.inner.apply("PL", vec![newer.clone()]).matches, 1);
        let delivered = count.load(Ordering::SeqCst);
        let persisted = db.count_events().unwrap();

        let report = scheduler.inner.apply("PL", vec![older]);
        assert_eq!((report.matches, report.events), (0, 0));
        assert_eq!(count.load(Ordering::SeqCst), delivered);
        assert_eq!(db.count_events().unwrap(), persisted);
        assert_eq!(db.get_snapshot(1).unwrap(), Some(newer.clone()));
        assert_eq!(scheduler.store().get(1), Some(newer));
    }

    #[test]
    fn test_concurrent_applies_keep_store_and_table_in_step() {
        let (scheduler, db) = scheduler(Arc::new(FakeTransport::scripted(vec![status(500)])), &["PL"]);
        let base = Utc::now();

        std::thread::scope(|scope| {
            for parity in 0..2i64 {
                let inner = &scheduler.inner;
                scope.spawn(move || {
                    for step in (parity..200).step_by(2) {
                        let at = base + chrono::Duration::milliseconds(step);
                        inner.apply("PL", vec![live_snapshot(1, step as u32, at)]);
                    }
                });
            }
        });

        let latest = scheduler.store().get(1).unwrap();
        assert_eq!(latest.home_score, 199);
        assert_eq!(db.get_snapshot(1).unwrap(), Some(latest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let transport = scoring_transport();
        let (scheduler, _db) = scheduler(transport.clone(), &["PL"]);
        assert!(scheduler.start(Duration::from_secs(30)));
        assert!(!scheduler.start(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        // One worker, one sweep so far.
        assert_eq!(transport.call_count(), 1);
        scheduler.stop().await;

        assert!(scheduler.start(Duration::from_secs(30)));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_sources_bypass_cache() {
        let transport = scoring_transport();
        let (scheduler, _db) = scheduler(transport.clone(), &["PL"]);
        scheduler.poll_source("PL").await.unwrap();
        scheduler.poll_source("PL").await.unwrap();
        assert_eq!(transport.call_count(), 2);
        assert_eq!(scheduler.store().get(1).unwrap().home_score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_sources_use_cache() {
        let transport = Arc::new(FakeTransport::scripted(vec![ok_json(matches_body(vec![
            match_json(1, "TIMED", 0, 0, None, "PL"),
        ]))]));
        let (scheduler, _db) = scheduler(transport.clone(), &["PL"]);
        scheduler.poll_source("PL").await.unwrap();
        let report = scheduler.poll_source("PL").await.unwrap();
        assert_eq!(transport.call_count(), 1);
        assert_eq!(report.statuses, vec![MatchStatus::Scheduled]);
        assert_eq!(report.events, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_source_does_not_block_others() {
        let transport = Arc::new(FakeTransport::new(|url, _| {
            if url.path().contains("/BAD/") {
                status(404)
            } else {
                ok_json(matches_body(vec![match_json(5, "LIVE", 1, 0, Some(30), "PL")]))
            }
        }));
        let (scheduler, db) = scheduler(transport, &["BAD", "PL"]);
        scheduler.sweep_once().await.unwrap();

        assert_eq!(scheduler.get_live_matches().len(), 1);
        assert!(db.get_snapshot(5).unwrap().is_some());
        let sources = scheduler.source_statuses();
        assert_eq!(sources[0].consecutive_failures, 1);
        assert!(sources[0].last_error.as_deref().unwrap().contains("404"));
        assert_eq!(sources[1].last_match_count, 1);
        assert!(sources[1].last_success_at.is_some());
        assert_eq!(scheduler.get_statistics().sweeps_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_failure_halts_worker() {
        let transport = Arc::new(FakeTransport::scripted(vec![status(401)]));
        let (scheduler, _db) = scheduler(transport.clone(), &["PL", "CL"]);
        scheduler.start(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(!scheduler.is_running());
        let stats = scheduler.get_statistics();
        assert!(stats.halted.is_some());
        assert_eq!(stats.sweeps_completed, 0);
        // Halted on the first source; the second was never tried.
        assert_eq!(transport.call_count(), 1);
        assert!(scheduler.sweep_once().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_statistics_and_export() {
        let transport = Arc::new(FakeTransport::scripted(vec![ok_json(matches_body(vec![
            match_json(1, "IN_PLAY", 2, 1, Some(70), "PL"),
            match_json(2, "FINISHED", 0, 0, None, "PL"),
            match_json(3, "POSTPONED", 0, 0, None, "PL"),
        ]))]));
        let (scheduler, _db) = scheduler(transport, &["PL"]);
        scheduler.sweep_once().await.unwrap();

        let stats = scheduler.get_statistics();
        assert_eq!(stats.total_matches, 3);
        assert_eq!(stats.live_count, 1);
        assert_eq!(stats.counts_by_status.get("FINISHED"), Some(&1));
        assert!(!stats.running);

        let per_competition = scheduler.competition_statuses();
        assert_eq!(per_competition.len(), 1);
        let pl = &per_competition[0];
        assert_eq!(pl.competition, "PL");
        assert_eq!((pl.total_matches, pl.live, pl.scheduled, pl.finished), (3, 1, 0, 1));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let doc = scheduler.export_snapshot(&path).unwrap();
        assert_eq!(doc.total_matches, 3);
        assert_eq!(doc.live_matches.len(), 1);
        assert!(path.exists());
    }
}
