//! ObservationStore - append-only log of observed facts.
//!
//! Design:
//! - Facts are grouped by `correlation_id`, in arrival order.
//! - Duplicates and late arrivals are stored, never refused; a repeated
//!   `msg_id` is only flagged.
//! - Records are never edited. They leave the store through an explicit
//!   purge or, when a per-correlation cap is configured, FIFO eviction.
//! - The store never purges on its own.

use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::domain::envelope::Envelope;
use crate::domain::errors::KernelError;
use crate::domain::ids::{CorrelationId, MsgId};
use crate::domain::observation::{IngestReceipt, ObservationRecord};
use crate::observability::ObservationStats;
use crate::ports::{Clock, TelemetrySink};

/// Maximum entries kept in the `(ingested_at, correlation_id)` index.
pub const TEMPORAL_INDEX_CAP: usize = 10_000;

pub struct ObservationStore {
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    max_per_correlation: Option<usize>,

    by_correlation: HashMap<CorrelationId, VecDeque<ObservationRecord>>,
    /// Correlations in first-seen order.
    correlation_order: Vec<CorrelationId>,
    seen_msg_ids: HashSet<MsgId>,
    temporal_index: VecDeque<(i64, CorrelationId)>,
}

impl ObservationStore {
    pub fn new(telemetry: Arc<dyn TelemetrySink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            telemetry,
            clock,
            max_per_correlation: None,
            by_correlation: HashMap::new(),
            correlation_order: Vec::new(),
            seen_msg_ids: HashSet::new(),
            temporal_index: VecDeque::new(),
        }
    }

    /// Cap each correlation at `max` records; the oldest is evicted first.
    pub fn with_max_per_correlation(mut self, max: Option<usize>) -> Self {
        self.max_per_correlation = max;
        self
    }

    /// Store a validated EVENT envelope as a fact.
    ///
    /// Errors only when the envelope is not an EVENT. Validation is the
    /// caller's job (`EnvelopeCodec`); it is not repeated here.
    pub fn ingest_event(&mut self, envelope: &Envelope) -> Result<IngestReceipt, KernelError> {
        let msg_id = envelope.msg_id();
        let correlation_id = envelope.correlation_id();

        if !envelope.is_event() {
            self.telemetry.warning(
                "observation_store_non_event_refused",
                json!({
                    "msg_id": msg_id.to_string(),
                    "message_type": envelope.message_type().as_str(),
                }),
            );
            return Err(KernelError::NotAnEvent(msg_id));
        }

        let duplicate = !self.seen_msg_ids.insert(msg_id);
        if duplicate {
            self.telemetry.warning(
                "observation_store_duplicate_detected",
                json!({
                    "msg_id": msg_id.to_string(),
                    "correlation_id": correlation_id.to_string(),
                }),
            );
        }

        let record = ObservationRecord {
            msg_id,
            correlation_id,
            source: envelope.identity.actor,
            action_code: envelope.action_code(),
            payload: envelope.payload.clone(),
            original_timestamp: envelope.protocol.timestamp,
            ingested_at: self.clock.now_ms(),
        };

        if !self.by_correlation.contains_key(&correlation_id) {
            self.correlation_order.push(correlation_id);
        }
        let list = self.by_correlation.entry(correlation_id).or_default();

        let mut evicted = None;
        if let Some(cap) = self.max_per_correlation
            && list.len() >= cap
        {
            self.telemetry.warning(
                "observation_store_limit_exceeded",
                json!({
                    "correlation_id": correlation_id.to_string(),
                    "limit": cap,
                }),
            );
            if let Some(oldest) = list.pop_front() {
                self.telemetry.info(
                    "observation_store_observation_discarded",
                    json!({
                        "msg_id": oldest.msg_id.to_string(),
                        "correlation_id": correlation_id.to_string(),
                    }),
                );
                evicted = Some(oldest.msg_id);
            }
        }
        list.push_back(record.clone());

        self.temporal_index
            .push_back((record.ingested_at, correlation_id));
        while self.temporal_index.len() > TEMPORAL_INDEX_CAP {
            self.temporal_index.pop_front();
        }

        self.telemetry.info(
            "observation_store_observation_ingested",
            json!({
                "msg_id": msg_id.to_string(),
                "correlation_id": correlation_id.to_string(),
                "action_code": record.action_code.as_str(),
                "duplicate": duplicate,
            }),
        );

        Ok(IngestReceipt {
            record,
            duplicate,
            evicted,
        })
    }

    /// Observations of one correlation, arrival order.
    pub fn get_by_correlation(&self, correlation_id: &CorrelationId) -> Vec<ObservationRecord> {
        self.by_correlation
            .get(correlation_id)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Observations ingested within `[start, end]`, each once, oldest first.
    ///
    /// Correlations are located through the temporal index, then every
    /// in-range record of each located correlation is returned. A correlation
    /// none of whose in-range entries are still among the index's last
    /// `TEMPORAL_INDEX_CAP` entries is not found.
    pub fn get_by_time_range(&self, start: i64, end: i64) -> Vec<ObservationRecord> {
        let mut seen = HashSet::new();
        let correlations: Vec<CorrelationId> = self
            .temporal_index
            .iter()
            .filter(|(at, _)| (start..=end).contains(at))
            .map(|(_, correlation_id)| *correlation_id)
            .filter(|correlation_id| seen.insert(*correlation_id))
            .collect();

        let mut out: Vec<ObservationRecord> = correlations
            .iter()
            .filter_map(|c| self.by_correlation.get(c))
            .flat_map(|list| list.iter())
            .filter(|r| (start..=end).contains(&r.ingested_at))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.ingested_at);
        out
    }

    pub fn get_last_observation(&self, correlation_id: &CorrelationId) -> Option<ObservationRecord> {
        self.by_correlation
            .get(correlation_id)
            .and_then(|list| list.back().cloned())
    }

    pub fn has_correlation(&self, correlation_id: &CorrelationId) -> bool {
        self.by_correlation.contains_key(correlation_id)
    }

    pub fn count_observations(&self, correlation_id: &CorrelationId) -> usize {
        self.by_correlation
            .get(correlation_id)
            .map_or(0, VecDeque::len)
    }

    /// Every stored record, grouped by correlation in first-seen order.
    pub fn list_all(&self) -> Vec<ObservationRecord> {
        self.correlation_order
            .iter()
            .filter_map(|c| self.by_correlation.get(c))
            .flat_map(|list| list.iter().cloned())
            .collect()
    }

    pub fn list_correlations(&self) -> Vec<CorrelationId> {
        self.correlation_order.clone()
    }

    pub fn stats(&self) -> ObservationStats {
        ObservationStats {
            total_observations: self.by_correlation.values().map(VecDeque::len).sum(),
            correlations: self.by_correlation.len(),
            unique_msg_ids: self.seen_msg_ids.len(),
            temporal_index_size: self.temporal_index.len(),
            max_per_correlation: self.max_per_correlation,
        }
    }

    /// Drop every record of one correlation. Seen msg ids are kept, so a
    /// replay after the purge is still flagged as a duplicate.
    pub fn purge_correlation(&mut self, correlation_id: &CorrelationId) -> bool {
        let Some(removed) = self.by_correlation.remove(correlation_id) else {
            return false;
        };
        self.correlation_order.retain(|c| c != correlation_id);
        self.temporal_index.retain(|(_, c)| c != correlation_id);

        self.telemetry.info(
            "observation_store_correlation_purged",
            json!({
                "correlation_id": correlation_id.to_string(),
                "removed": removed.len(),
            }),
        );
        true
    }

    /// Drop every record ingested strictly before `cutoff`. Returns how many.
    pub fn purge_older_than(&mut self, cutoff: i64) -> usize {
        let mut removed = 0;
        for list in self.by_correlation.values_mut() {
            let before = list.len();
            list.retain(|r| r.ingested_at >= cutoff);
            removed += before - list.len();
        }

        let emptied: Vec<CorrelationId> = self
            .by_correlation
            .iter()
            .filter(|(_, list)| list.is_empty())
            .map(|(c, _)| *c)
            .collect();
        for c in &emptied {
            self.by_correlation.remove(c);
        }
        self.correlation_order
            .retain(|c| self.by_correlation.contains_key(c));
        self.temporal_index.retain(|(at, _)| *at >= cutoff);

        self.telemetry.info(
            "observation_store_purged",
            json!({
                "cutoff": cutoff,
                "removed": removed,
                "correlations_removed": emptied.len(),
            }),
        );
        removed
    }
}
