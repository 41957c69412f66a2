//! RecordingTelemetry - bounded in-memory telemetry buffer.
//!
//! Keeps the most recent `retention` events plus a per-kind counter that is
//! never trimmed, so "how many rejections since start" survives eviction.
//! Every eviction is itself reported as `telemetry_discarded`: counted here
//! and, when an overflow sink is attached, forwarded to it.
//! Used by tests and by the CLI status output.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ports::{Clock, SystemClock, TelemetrySeverity, TelemetrySink};

pub const DEFAULT_RETENTION: usize = 5000;

/// Kind reported for every event pushed out of the buffer.
pub const TELEMETRY_DISCARDED: &str = "telemetry_discarded";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    pub kind: String,
    /// Clock time at emission, epoch milliseconds.
    pub at: i64,
    pub severity: TelemetrySeverity,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct Buffer {
    events: VecDeque<TelemetryEvent>,
    counters: HashMap<String, u64>,
    next_seq: u64,
}

pub struct RecordingTelemetry {
    retention: usize,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    overflow: Option<Arc<dyn TelemetrySink>>,
    buffer: Mutex<Buffer>,
}

impl RecordingTelemetry {
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            clock: Arc::new(SystemClock),
            enabled: AtomicBool::new(true),
            overflow: None,
            buffer: Mutex::new(Buffer::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where `telemetry_discarded` notices go. Must not lead back here.
    pub fn with_overflow(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.overflow = Some(sink);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.info("telemetry_enabled", json!({ "at": self.clock.now_ms() }));
    }

    /// Stop recording. Events emitted while disabled are neither kept nor counted.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.lock().events.iter().cloned().collect()
    }

    pub fn events_by_type(&self, kind: &str) -> Vec<TelemetryEvent> {
        self.retained(|e| e.kind == kind)
    }

    pub fn events_by_severity(&self, severity: TelemetrySeverity) -> Vec<TelemetryEvent> {
        self.retained(|e| e.severity == severity)
    }

    /// Retained events with `start <= at <= end`.
    pub fn events_by_time_range(&self, start: i64, end: i64) -> Vec<TelemetryEvent> {
        self.retained(|e| (start..=end).contains(&e.at))
    }

    fn retained(&self, keep: impl Fn(&TelemetryEvent) -> bool) -> Vec<TelemetryEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }

    /// Total events of `kind` ever emitted, evicted ones included.
    pub fn count(&self, kind: &str) -> u64 {
        self.lock().counters.get(kind).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> HashMap<String, u64> {
        self.lock().counters.clone()
    }

    pub fn clear(&self) {
        let mut buffer = self.lock();
        buffer.events.clear();
        buffer.counters.clear();
    }
}

impl Default for RecordingTelemetry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl fmt::Debug for RecordingTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingTelemetry")
            .field("retention", &self.retention)
            .field("enabled", &self.is_enabled())
            .field("overflow", &self.overflow.is_some())
            .finish()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, kind: &str, payload: Value, severity: TelemetrySeverity) {
        if !self.is_enabled() {
            return;
        }
        let at = self.clock.now_ms();
        let mut discarded = Vec::new();
        {
            let mut buffer = self.lock();
            buffer.next_seq += 1;
            let seq = buffer.next_seq;
            *buffer.counters.entry(kind.to_string()).or_insert(0) += 1;

            if self.retention == 0 {
                return;
            }
            while buffer.events.len() >= self.retention {
                if let Some(evicted) = buffer.events.pop_front() {
                    discarded.push(evicted.kind);
                }
            }
            if !discarded.is_empty() {
                *buffer
                    .counters
                    .entry(TELEMETRY_DISCARDED.to_string())
                    .or_insert(0) += discarded.len() as u64;
            }
            buffer.events.push_back(TelemetryEvent {
                seq,
                kind: kind.to_string(),
                at,
                severity,
                payload,
            });
        }

        // outside the lock: the overflow sink may be slow
        if let Some(overflow) = &self.overflow {
            for discarded_kind in discarded {
                overflow.warning(
                    TELEMETRY_DISCARDED,
                    json!({ "discardedAt": at, "discardedEventType": discarded_kind }),
                );
            }
        }
    }
}
