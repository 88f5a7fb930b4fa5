//! Buffered analytics for configuration sessions.
//!
//! A [`SessionTracker`] is constructed explicitly and passed to the sessions
//! that report through it. Time comes from an injected [`Clock`] so flush
//! scheduling can be driven deterministically; the caller decides when to
//! poll [`SessionTracker::flush_if_due`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{TrackerConfig, MAX_FLUSH_INTERVAL_SECS};
use crate::errors::RepositoryError;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = match self.now.lock() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerEventKind {
    SessionStarted,
    OptionSelected,
    OptionRemoved,
    QuantityChanged,
    RestrictionSurfaced,
    AutoSelectionAccepted,
    ConfigurationSaved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub event_id: String,
    pub session_id: String,
    pub kind: TrackerEventKind,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl TrackerEvent {
    pub fn new(
        session_id: impl Into<String>,
        kind: TrackerEventKind,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            kind,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait TrackerSink: Send + Sync {
    fn deliver(&self, batch: &[TrackerEvent]) -> Result<(), RepositoryError>;
}

#[derive(Clone, Default)]
pub struct InMemoryTrackerSink {
    batches: Arc<Mutex<Vec<Vec<TrackerEvent>>>>,
}

impl InMemoryTrackerSink {
    pub fn batches(&self) -> Vec<Vec<TrackerEvent>> {
        match self.batches.lock() {
            Ok(batches) => batches.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.batches().into_iter().flatten().collect()
    }
}

impl TrackerSink for InMemoryTrackerSink {
    fn deliver(&self, batch: &[TrackerEvent]) -> Result<(), RepositoryError> {
        match self.batches.lock() {
            Ok(mut batches) => batches.push(batch.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(batch.to_vec()),
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackerSettings {
    pub flush_interval: Duration,
    pub max_buffered_events: usize,
}

impl TrackerSettings {
    pub fn from_config(config: &TrackerConfig) -> Self {
        let flush_interval = i64::try_from(config.flush_interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(MAX_FLUSH_INTERVAL_SECS as i64));
        Self {
            flush_interval,
            max_buffered_events: config.max_buffered_events.max(1),
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self { flush_interval: Duration::seconds(30), max_buffered_events: 500 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    Running,
    Stopped,
}

struct TrackerInner {
    state: TrackerState,
    buffer: Vec<TrackerEvent>,
    last_flush: DateTime<Utc>,
    dropped: u64,
}

pub struct SessionTracker {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TrackerSink>,
    settings: TrackerSettings,
    inner: Mutex<TrackerInner>,
}

impl std::fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionTracker")
            .field("settings", &self.settings)
            .field("state", &inner.state)
            .field("buffered", &inner.buffer.len())
            .finish()
    }
}

impl SessionTracker {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn TrackerSink>, settings: TrackerSettings) -> Self {
        let last_flush = clock.now();
        Self {
            clock,
            sink,
            settings,
            inner: Mutex::new(TrackerInner {
                state: TrackerState::Idle,
                buffer: Vec::new(),
                last_flush,
                dropped: 0,
            }),
        }
    }

    pub fn start(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            TrackerState::Idle => {
                inner.state = TrackerState::Running;
                inner.last_flush = now;
            }
            TrackerState::Running => {}
            TrackerState::Stopped => {
                warn!(event_name = "tracker.restart_ignored", "tracker was stopped and cannot restart");
            }
        }
    }

    /// Buffers an event. Returns `false` when the tracker is not running and
    /// the event was dropped. Reaching the buffer cap triggers a flush.
    pub fn record(
        &self,
        session_id: &str,
        kind: TrackerEventKind,
        metadata: BTreeMap<String, String>,
    ) -> bool {
        let mut event = TrackerEvent::new(session_id, kind, self.clock.now());
        event.metadata = metadata;

        let buffer_full = {
            let mut inner = self.lock();
            if inner.state != TrackerState::Running {
                debug!(session_id, kind = ?kind, "tracker not running, event dropped");
                return false;
            }
            inner.buffer.push(event);
            inner.buffer.len() >= self.settings.max_buffered_events
        };

        if buffer_full {
            // a failed delivery keeps the events buffered for the next flush
            let _ = self.flush();
        }
        true
    }

    pub fn flush_if_due(&self) -> Result<usize, RepositoryError> {
        let due = {
            let inner = self.lock();
            inner.state == TrackerState::Running
                && self.clock.now() - inner.last_flush >= self.settings.flush_interval
        };
        if due {
            self.flush()
        } else {
            Ok(0)
        }
    }

    /// Delivers every buffered event as one batch.
    ///
    /// On sink failure the batch goes back in front of anything recorded in
    /// the meantime, trimmed from the oldest end to the buffer cap.
    pub fn flush(&self) -> Result<usize, RepositoryError> {
        let batch = {
            let mut inner = self.lock();
            inner.last_flush = self.clock.now();
            std::mem::take(&mut inner.buffer)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match self.sink.deliver(&batch) {
            Ok(()) => {
                debug!(event_name = "tracker.flushed", delivered = batch.len(), "tracker flushed");
                Ok(batch.len())
            }
            Err(error) => {
                let mut inner = self.lock();
                let mut restored = batch;
                restored.append(&mut inner.buffer);
                let overflow = restored.len().saturating_sub(self.settings.max_buffered_events);
                if overflow > 0 {
                    restored.drain(..overflow);
                    inner.dropped += overflow as u64;
                }
                inner.buffer = restored;
                warn!(
                    event_name = "tracker.flush_failed",
                    error = %error,
                    buffered = inner.buffer.len(),
                    dropped = overflow,
                    "tracker sink rejected batch"
                );
                Err(error)
            }
        }
    }

    /// Flushes what is buffered and stops accepting events. The tracker is
    /// stopped even when the final flush fails.
    pub fn stop(&self) -> Result<usize, RepositoryError> {
        let result = self.flush();
        self.lock().state = TrackerState::Stopped;
        result
    }

    pub fn state(&self) -> TrackerState {
        self.lock().state
    }

    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::{
        InMemoryTrackerSink, ManualClock, SessionTracker, TrackerEvent, TrackerEventKind,
        TrackerSettings, TrackerSink, TrackerState,
    };
    use crate::config::TrackerConfig;
    use crate::errors::RepositoryError;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()))
    }

    fn settings(interval_secs: i64, cap: usize) -> TrackerSettings {
        TrackerSettings { flush_interval: Duration::seconds(interval_secs), max_buffered_events: cap }
    }

    #[test]
    fn oversized_flush_interval_falls_back_to_the_cap() {
        let settings = TrackerSettings::from_config(&TrackerConfig {
            flush_interval_secs: u64::MAX,
            max_buffered_events: 10,
        });
        assert_eq!(settings.flush_interval, Duration::seconds(86_400));

        let settings = TrackerSettings::from_config(&TrackerConfig {
            flush_interval_secs: 100_000_000_000_000_000,
            max_buffered_events: 10,
        });
        assert_eq!(settings.flush_interval, Duration::seconds(86_400));
    }

    #[test]
    fn events_are_dropped_until_started_and_after_stop() {
        let sink = InMemoryTrackerSink::default();
        let tracker = SessionTracker::new(clock(), Arc::new(sink.clone()), settings(30, 10));

        assert!(!tracker.record("s-1", TrackerEventKind::SessionStarted, BTreeMap::new()));
        tracker.start();
        assert!(tracker.record("s-1", TrackerEventKind::SessionStarted, BTreeMap::new()));
        assert_eq!(tracker.stop().expect("stop flush"), 1);
        assert_eq!(tracker.state(), TrackerState::Stopped);
        assert!(!tracker.record("s-1", TrackerEventKind::OptionSelected, BTreeMap::new()));

        tracker.start();
        assert_eq!(tracker.state(), TrackerState::Stopped, "stopped tracker stays stopped");
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn flush_if_due_follows_the_injected_clock() {
        let clock = clock();
        let sink = InMemoryTrackerSink::default();
        let tracker = SessionTracker::new(clock.clone(), Arc::new(sink.clone()), settings(30, 100));
        tracker.start();

        let mut metadata = BTreeMap::new();
        metadata.insert("option_id".to_owned(), "memory".to_owned());
        tracker.record("s-1", TrackerEventKind::OptionSelected, metadata);

        clock.advance(Duration::seconds(29));
        assert_eq!(tracker.flush_if_due().expect("flush"), 0);
        assert_eq!(tracker.buffered(), 1);

        clock.advance(Duration::seconds(1));
        assert_eq!(tracker.flush_if_due().expect("flush"), 1);
        let events = sink.events();
        assert_eq!(events[0].metadata.get("option_id").map(String::as_str), Some("memory"));
        assert_eq!(events[0].occurred_at, Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn reaching_buffer_cap_flushes_immediately() {
        let sink = InMemoryTrackerSink::default();
        let tracker = SessionTracker::new(clock(), Arc::new(sink.clone()), settings(3600, 2));
        tracker.start();

        tracker.record("s-1", TrackerEventKind::OptionSelected, BTreeMap::new());
        assert!(sink.batches().is_empty());
        tracker.record("s-1", TrackerEventKind::OptionRemoved, BTreeMap::new());
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(tracker.buffered(), 0);
    }

    #[derive(Default)]
    struct FlakySink {
        failing: AtomicBool,
        inner: InMemoryTrackerSink,
    }

    impl TrackerSink for FlakySink {
        fn deliver(&self, batch: &[TrackerEvent]) -> Result<(), RepositoryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RepositoryError::Storage("sink offline".to_owned()));
            }
            self.inner.deliver(batch)
        }
    }

    #[test]
    fn failed_flush_keeps_newest_events_up_to_the_cap() {
        let sink = Arc::new(FlakySink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let tracker = SessionTracker::new(clock(), sink.clone(), settings(3600, 3));
        tracker.start();

        for index in 0..5 {
            let mut metadata = BTreeMap::new();
            metadata.insert("index".to_owned(), index.to_string());
            tracker.record("s-1", TrackerEventKind::QuantityChanged, metadata);
        }
        assert_eq!(tracker.buffered(), 3);
        assert!(tracker.dropped() > 0);

        sink.failing.store(false, Ordering::SeqCst);
        assert_eq!(tracker.flush().expect("flush"), 3);
        let indexes = sink
            .inner
            .events()
            .iter()
            .filter_map(|event| event.metadata.get("index").cloned())
            .collect::<Vec<_>>();
        assert_eq!(indexes, vec!["2".to_owned(), "3".to_owned(), "4".to_owned()]);
    }
}
