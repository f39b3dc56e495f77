//! Fan-out of detected events to subscribers and the persistence gateway.
//!
//! Each event is persisted first, then handed to every subscriber in
//! registration order. A failing (or panicking) subscriber is logged and
//! skipped; it never stops delivery to the others.

use anyhow::Result;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::db::models::MatchEvent;
use crate::db::PersistenceGateway;

/// Receiver of match events.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &MatchEvent) -> Result<()>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "subscriber"
    }
}

impl<F> Subscriber for F
where
    F: Fn(&MatchEvent) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &MatchEvent) -> Result<()> {
        self(event)
    }
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub events: usize,
    pub persisted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct EventDispatcher {
    subscribers: Arc<RwLock<Vec<Arc<dyn Subscriber>>>>,
    persistence: Arc<dyn PersistenceGateway>,
}

impl EventDispatcher {
    pub fn new(persistence: Arc<dyn PersistenceGateway>) -> Self {
        EventDispatcher {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            persistence,
        }
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        info!("Subscriber registered: {}", subscriber.name());
        self.subscribers.write().push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn publish(&self, events: &[MatchEvent]) -> DispatchReport {
        let mut report = DispatchReport {
            events: events.len(),
            ..Default::default()
        };
        if events.is_empty() {
            return report;
        }
        // Snapshot the list so a subscriber may register others without deadlocking.
        let subscribers: Vec<Arc<dyn Subscriber>> = self.subscribers.read().clone();

        for event in events {
            match self.persistence.append_event(event) {
                Ok(_) => report.persisted += 1,
                Err(e) => error!(
                    "Failed to persist {} for match {}: {:#}",
                    event.kind, event.match_id, e
                ),
            }

            for subscriber in &subscribers {
                match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                    Ok(Ok(())) => report.delivered += 1,
                    Ok(Err(e)) => {
                        report.failed += 1;
                        error!("Subscriber '{}' failed on {}: {:#}", subscriber.name(), event.kind, e);
                    }
                    Err(_) => {
                        report.failed += 1;
                        error!("Subscriber '{}' panicked on {}", subscriber.name(), event.kind);
                    }
                }
            }
        }
        report
    }
}

/// Logs every event at info level.
pub struct LogSubscriber;

impl Subscriber for LogSubscriber {
    fn on_event(&self, event: &MatchEvent) -> Result<()> {
        let s = &event.snapshot;
        info!(
            "[{}] {}: {} {}-{} {}{}",
            s.competition,
            event.kind,
            s.home_team,
            s.home_score,
            s.away_score,
            s.away_team,
            s.minute.map(|m| format!(" ({}')", m)).unwrap_or_default()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Forwards events into a bounded channel for async consumers.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<MatchEvent>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<MatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ChannelSubscriber { tx }), rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_event(&self, event: &MatchEvent) -> Result<()> {
        self.tx
            .try_send(event.clone())
            .map_err(|e| anyhow::anyhow!("event channel full or closed, event DROPPED: {}", e))
    }

    fn name(&self) -> &str {
        "channel"
    }
}
