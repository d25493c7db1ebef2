//! # Escalation Tracker — Append-only stage history per threat event
//!
//! Records how an event's assessed stage, confidence, and severity move as
//! new signals arrive. Recording always succeeds and performs no validation
//! against prior stages: stages may be skipped or repeated. That permissive
//! behavior is deliberate — upstream assessments are messy and the tracker
//! is a log, not a state machine. Timestamps are clamped so the per-event
//! history is monotonically non-decreasing even under clock hiccups.

use crate::store::AlertStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use vigil_core::types::{EscalationRecord, EscalationStage, Severity, SupportingSignal};
use vigil_realtime::{RealtimeBroadcaster, UpdateData, UpdateType};

pub struct EscalationTracker {
    records: RwLock<HashMap<u64, Vec<EscalationRecord>>>,
    total_recorded: AtomicU64,
    /// When wired, stage changes fan out as realtime updates to every
    /// tenant holding an alert on the event.
    broadcaster: Option<Arc<RealtimeBroadcaster>>,
    alerts: Option<Arc<AlertStore>>,
}

impl EscalationTracker {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            total_recorded: AtomicU64::new(0),
            broadcaster: None,
            alerts: None,
        }
    }

    pub fn with_realtime(
        mut self,
        broadcaster: Arc<RealtimeBroadcaster>,
        alerts: Arc<AlertStore>,
    ) -> Self {
        self.broadcaster = Some(broadcaster);
        self.alerts = Some(alerts);
        self
    }

    /// Append a stage record for an event. Always succeeds.
    #[allow(clippy::too_many_arguments)]
    pub fn record_stage(
        &self,
        event_id: u64,
        stage: EscalationStage,
        confidence: f64,
        severity: Severity,
        trigger_source: &str,
        trigger_description: &str,
        supporting_signals: Vec<SupportingSignal>,
    ) -> EscalationRecord {
        let now = chrono::Utc::now().timestamp();
        let record = {
            let mut records = self.records.write();
            let history = records.entry(event_id).or_default();
            // Keep per-event history monotonic in recorded_at.
            let recorded_at = history
                .last()
                .map_or(now, |prev| now.max(prev.recorded_at));
            let record = EscalationRecord {
                event_id,
                stage,
                confidence,
                severity,
                trigger_source: trigger_source.into(),
                trigger_description: trigger_description.into(),
                supporting_signals,
                recorded_at,
            };
            history.push(record.clone());
            record
        };

        self.total_recorded.fetch_add(1, Ordering::Relaxed);
        info!(event_id, stage = ?stage, confidence, severity = %severity, "Escalation stage recorded");

        if let (Some(broadcaster), Some(alerts)) = (self.broadcaster.as_ref(), self.alerts.as_ref())
        {
            for alert in alerts.alerts_for_event(event_id) {
                let data = UpdateData {
                    stage: Some(stage),
                    ..Default::default()
                };
                broadcaster.broadcast_update(
                    &alert.tenant_id,
                    alert.alert_id,
                    UpdateType::Escalation,
                    data,
                );
            }
        }
        record
    }

    /// The event's full stage history ordered by recorded_at.
    pub fn trajectory(&self, event_id: u64) -> Vec<EscalationRecord> {
        let mut history = self
            .records
            .read()
            .get(&event_id)
            .cloned()
            .unwrap_or_default();
        history.sort_by_key(|r| r.recorded_at);
        history
    }

    /// The most recent stage assessment for an event, if any.
    pub fn current_stage(&self, event_id: u64) -> Option<EscalationStage> {
        self.records
            .read()
            .get(&event_id)
            .and_then(|h| h.last())
            .map(|r| r.stage)
    }

    pub fn total_recorded(&self) -> u64 { self.total_recorded.load(Ordering::Relaxed) }

    pub fn tracked_events(&self) -> usize {
        self.records.read().len()
    }
}

impl Default for EscalationTracker {
    fn default() -> Self {
        Self::new()
    }
}
