//! # Alert Distributor — One alert per (event, profile) match
//!
//! Copies severity/urgency at creation time, computes the straight-line
//! distance from the event to the profile's geofence centroid, and creates
//! exactly one PENDING alert per matched pair. Re-matching an
//! already-alerted pair is idempotent: the existing alert id is returned
//! and nothing new is created.
//!
//! Created alerts are handed to the delivery router on spawned tasks, so
//! distributing one alert never blocks distribution of the others.

use crate::delivery::DeliveryChannelRouter;
use crate::store::{AlertStore, LearningStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use vigil_core::geo::{centroid_of, haversine_km};
use vigil_core::types::{DeliveryStatus, IntelligenceAlert, OperatorResponse, TenantMonitoringProfile, ThreatEvent};

pub struct AlertDistributor {
    alerts: Arc<AlertStore>,
    learning: Arc<LearningStore>,
    router: Option<Arc<DeliveryChannelRouter>>,
    total_created: AtomicU64,
    duplicates_suppressed: AtomicU64,
}

impl AlertDistributor {
    pub fn new(alerts: Arc<AlertStore>, learning: Arc<LearningStore>) -> Self {
        Self {
            alerts,
            learning,
            router: None,
            total_created: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
        }
    }

    /// Wire the delivery router; without one, alerts are created but stay
    /// PENDING until an external caller routes them.
    pub fn with_router(mut self, router: Arc<DeliveryChannelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Create alerts for every matched profile and hand each new one to
    /// delivery. Returns the ids of alerts created by this call.
    pub fn distribute(
        &self,
        event: &ThreatEvent,
        matched: &[TenantMonitoringProfile],
    ) -> Vec<u64> {
        let location = match event.location {
            Some(loc) => loc,
            // Matched profiles imply a located event; nothing to do otherwise.
            None => return Vec::new(),
        };

        let mut created_ids = Vec::new();
        for profile in matched {
            let distance_km = centroid_of(&profile.geofences)
                .map(|c| haversine_km(&location, &c))
                .unwrap_or(0.0);
            let urgency = profile.urgency.for_severity(event.severity);
            let now = chrono::Utc::now().timestamp();

            let (alert_id, created) =
                self.alerts
                    .create_if_absent(event.id, profile.profile_id, |id| IntelligenceAlert {
                        alert_id: id,
                        event_id: event.id,
                        profile_id: profile.profile_id,
                        tenant_id: profile.tenant_id.clone(),
                        severity: event.severity,
                        urgency,
                        distance_km,
                        status: DeliveryStatus::Pending,
                        channels_delivered: Vec::new(),
                        delivery_error: None,
                        ticket_id: None,
                        created_at: now,
                        delivered_at: None,
                        response: OperatorResponse::NoResponse,
                        response_note: None,
                        responded_at: None,
                    });

            if !created {
                self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = event.id, profile_id = profile.profile_id, "Duplicate match, alert exists");
                continue;
            }

            self.total_created.fetch_add(1, Ordering::Relaxed);
            self.learning.note_alert(&profile.tenant_id);
            info!(
                alert_id,
                event_id = event.id,
                tenant = %profile.tenant_id,
                urgency = %urgency,
                distance_km,
                "Alert created"
            );
            created_ids.push(alert_id);

            if let Some(router) = self.router.as_ref() {
                let router = Arc::clone(router);
                let profile = profile.clone();
                tokio::spawn(async move {
                    if let Err(e) = router.deliver(alert_id, &profile).await {
                        tracing::warn!(alert_id, error = %e, "Delivery failed");
                    }
                });
            }
        }
        created_ids
    }

    pub fn total_created(&self) -> u64 { self.total_created.load(Ordering::Relaxed) }
    pub fn duplicates_suppressed(&self) -> u64 { self.duplicates_suppressed.load(Ordering::Relaxed) }
}
