//! # Feedback Learning Engine — Operator responses close the loop
//!
//! Records operator feedback on alerts and folds it into the owning
//! tenant's learning profile: actionable/false-positive/missed counters,
//! response-time statistics, and per-category sensitivity used by the
//! matcher to tune future confidence thresholds.
//!
//! Strictly additive — counters only ever increase and history is never
//! deleted, so concurrent feedback submissions for different alerts of the
//! same tenant stay correct. Derived rates are computed on read from the
//! counters and can never drift.

use crate::store::{AlertStore, EventStore, LearningStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use vigil_core::types::{DeliveryStatus, OperatorResponse, TenantLearningProfile};
use vigil_core::{VigilError, VigilResult};
use vigil_realtime::{RealtimeBroadcaster, UpdateData, UpdateType};

/// Multiplicative sensitivity nudges, clamped to [0.5, 1.5].
const SENSITIVITY_UP: f64 = 1.02;
const SENSITIVITY_DOWN: f64 = 0.95;
const SENSITIVITY_MIN: f64 = 0.5;
const SENSITIVITY_MAX: f64 = 1.5;

pub struct FeedbackLearningEngine {
    alerts: Arc<AlertStore>,
    events: Arc<EventStore>,
    learning: Arc<LearningStore>,
    broadcaster: Option<Arc<RealtimeBroadcaster>>,
    total_responses: AtomicU64,
}

impl FeedbackLearningEngine {
    pub fn new(alerts: Arc<AlertStore>, events: Arc<EventStore>, learning: Arc<LearningStore>) -> Self {
        Self {
            alerts,
            events,
            learning,
            broadcaster: None,
            total_responses: AtomicU64::new(0),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<RealtimeBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Record an operator response. `response_type` is validated against the
    /// known enum; unknown values are rejected at this boundary.
    ///
    /// Resubmitting for an already-responded alert rewrites the alert's
    /// recorded response only; the learning counters take one sample per
    /// alert, so rates stay within [0, 1].
    pub fn record_response(
        &self,
        alert_id: u64,
        response_type: &str,
        notes: Option<String>,
    ) -> VigilResult<OperatorResponse> {
        let response: OperatorResponse = response_type.parse()?;
        if response == OperatorResponse::NoResponse {
            return Err(VigilError::InvalidInput(
                "NO_RESPONSE is the default state, not a submittable response".into(),
            ));
        }

        let now = chrono::Utc::now().timestamp();
        let mut first_response = false;
        let updated = self.alerts.update(alert_id, |a| {
            first_response = a.responded_at.is_none();
            a.response = response;
            a.response_note = notes;
            a.responded_at = Some(now);
        })?;

        if !first_response {
            self.total_responses.fetch_add(1, Ordering::Relaxed);
            info!(alert_id, tenant = %updated.tenant_id, response = ?response, "Operator response revised");

            if let Some(broadcaster) = self.broadcaster.as_ref() {
                let data = UpdateData {
                    response: Some(response),
                    note: updated.response_note.clone(),
                    ..Default::default()
                };
                broadcaster.broadcast_update(&updated.tenant_id, alert_id, UpdateType::Response, data);
            }
            return Ok(response);
        }

        // Counter updates are increments under the store's write lock,
        // never read-modify-write from a stale snapshot.
        let category = self.events.get(updated.event_id).map(|e| e.category);
        self.learning.update(&updated.tenant_id, |profile| {
            match response {
                OperatorResponse::Actionable => {
                    profile.actionable_count += 1;
                    if let Some(cat) = category {
                        nudge(profile, cat, SENSITIVITY_UP);
                    }
                }
                OperatorResponse::FalsePositive => {
                    profile.false_positive_count += 1;
                    if let Some(cat) = category {
                        nudge(profile, cat, SENSITIVITY_DOWN);
                    }
                }
                OperatorResponse::Missed => {
                    profile.missed_count += 1;
                    if let Some(cat) = category {
                        nudge(profile, cat, SENSITIVITY_UP);
                    }
                }
                // Recorded on the alert only. TOO_SENSITIVE feeds the
                // external periodic re-tuning job, not these counters;
                // NO_RESPONSE was rejected at the boundary above.
                OperatorResponse::Noted
                | OperatorResponse::TooSensitive
                | OperatorResponse::NoResponse => {}
            }
            let elapsed = now - updated.created_at;
            if elapsed >= 0 {
                profile.response_time_sum_secs += elapsed;
                profile.response_count += 1;
            }
        });

        self.total_responses.fetch_add(1, Ordering::Relaxed);
        info!(alert_id, tenant = %updated.tenant_id, response = ?response, "Operator response recorded");

        if let Some(broadcaster) = self.broadcaster.as_ref() {
            let data = UpdateData {
                response: Some(response),
                note: updated.response_note.clone(),
                ..Default::default()
            };
            broadcaster.broadcast_update(&updated.tenant_id, alert_id, UpdateType::Response, data);
        }
        Ok(response)
    }

    /// Operator confirmed receipt: SENT → DELIVERED. Any other state is
    /// left untouched (the status lattice is monotonic).
    pub fn acknowledge(&self, alert_id: u64) -> VigilResult<DeliveryStatus> {
        let updated = self.alerts.update(alert_id, |a| {
            if a.status == DeliveryStatus::Sent {
                a.status = DeliveryStatus::Delivered;
            }
        })?;

        if let Some(broadcaster) = self.broadcaster.as_ref() {
            let data = UpdateData {
                status: Some(updated.status),
                ..Default::default()
            };
            broadcaster.broadcast_update(&updated.tenant_id, alert_id, UpdateType::Acknowledged, data);
        }
        Ok(updated.status)
    }

    /// Snapshot of a tenant's learning profile.
    pub fn profile(&self, tenant_id: &str) -> TenantLearningProfile {
        self.learning.get(tenant_id)
    }

    /// Entry point for the external tuning job to install a learned
    /// monitoring radius.
    pub fn set_effective_radius(&self, tenant_id: &str, radius_km: Option<f64>) {
        self.learning.update(tenant_id, |p| p.effective_radius_km = radius_km);
    }

    pub fn total_responses(&self) -> u64 { self.total_responses.load(Ordering::Relaxed) }
}

fn nudge(profile: &mut TenantLearningProfile, category: vigil_core::types::ThreatCategory, factor: f64) {
    let entry = profile.category_sensitivity.entry(category).or_insert(1.0);
    *entry = (*entry * factor).clamp(SENSITIVITY_MIN, SENSITIVITY_MAX);
}
