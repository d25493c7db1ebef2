//! In-memory stores shared across pipeline engines.
//!
//! Each store owns one lock. The alert store's pair index is the
//! serialization point for the at-most-one-alert-per-(event, profile)
//! invariant: creation is compare-and-create under a single write lock, so
//! two concurrent matching passes for the same pair cannot both insert.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use vigil_core::types::{IntelligenceAlert, TenantLearningProfile, TenantMonitoringProfile, ThreatEvent};
use vigil_core::{VigilError, VigilResult};

// ── Event store ──────────────────────────────────────────────────────────────

/// Classified events accepted at the boundary. Events are immutable once
/// stored; escalation history lives in the tracker.
pub struct EventStore {
    events: RwLock<HashMap<u64, ThreatEvent>>,
    next_id: AtomicU64,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Assigns the event id and stores the event. Returns the stored copy.
    pub fn insert(&self, mut event: ThreatEvent) -> ThreatEvent {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        event.id = id;
        self.events.write().insert(id, event.clone());
        event
    }

    pub fn get(&self, event_id: u64) -> Option<ThreatEvent> {
        self.events.read().get(&event_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Alert store ──────────────────────────────────────────────────────────────

/// The audit trail: alerts are created once per (event, profile) pair and
/// never deleted.
pub struct AlertStore {
    alerts: RwLock<HashMap<u64, IntelligenceAlert>>,
    /// (event_id, profile_id) → alert_id. Guarded compare-and-create.
    pair_index: RwLock<HashMap<(u64, u64), u64>>,
    next_id: AtomicU64,
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            alerts: RwLock::new(HashMap::new()),
            pair_index: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates the alert for this pair unless one already exists. Returns
    /// `(alert_id, created)`; `created == false` means the pair was already
    /// alerted and nothing was inserted.
    pub fn create_if_absent<F>(&self, event_id: u64, profile_id: u64, build: F) -> (u64, bool)
    where
        F: FnOnce(u64) -> IntelligenceAlert,
    {
        let mut index = self.pair_index.write();
        if let Some(&existing) = index.get(&(event_id, profile_id)) {
            debug!(event_id, profile_id, alert_id = existing, "Pair already alerted");
            return (existing, false);
        }
        let alert_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let alert = build(alert_id);
        self.alerts.write().insert(alert_id, alert);
        index.insert((event_id, profile_id), alert_id);
        (alert_id, true)
    }

    pub fn get(&self, alert_id: u64) -> Option<IntelligenceAlert> {
        self.alerts.read().get(&alert_id).cloned()
    }

    /// Atomic read-modify-write of one alert; concurrent readers observe
    /// either the old or the new state, never a partial update.
    pub fn update<F>(&self, alert_id: u64, mutate: F) -> VigilResult<IntelligenceAlert>
    where
        F: FnOnce(&mut IntelligenceAlert),
    {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .get_mut(&alert_id)
            .ok_or(VigilError::UnknownAlert(alert_id))?;
        mutate(alert);
        Ok(alert.clone())
    }

    pub fn alerts_for_event(&self, event_id: u64) -> Vec<IntelligenceAlert> {
        self.alerts
            .read()
            .values()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Every alert, ordered by id. Alerts are never deleted, so repeated
    /// snapshots only ever grow at the tail.
    pub fn all(&self) -> Vec<IntelligenceAlert> {
        let mut alerts: Vec<_> = self.alerts.read().values().cloned().collect();
        alerts.sort_by_key(|a| a.alert_id);
        alerts
    }

    pub fn alerts_for_tenant(&self, tenant_id: &str) -> Vec<IntelligenceAlert> {
        self.alerts
            .read()
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Profile registry ─────────────────────────────────────────────────────────

/// Tenant monitoring profiles, mutated by the external administrative
/// surface and read-only to the matching engine.
pub struct ProfileRegistry {
    profiles: RwLock<HashMap<u64, TenantMonitoringProfile>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert(&self, profile: TenantMonitoringProfile) {
        self.profiles.write().insert(profile.profile_id, profile);
    }

    pub fn remove(&self, profile_id: u64) -> bool {
        self.profiles.write().remove(&profile_id).is_some()
    }

    pub fn get(&self, profile_id: u64) -> Option<TenantMonitoringProfile> {
        self.profiles.read().get(&profile_id).cloned()
    }

    /// Snapshot of all active profiles for one matching pass.
    pub fn active(&self) -> Vec<TenantMonitoringProfile> {
        self.profiles
            .read()
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Learning store ───────────────────────────────────────────────────────────

/// Per-tenant adaptive learning profiles. Counter updates run under one
/// write lock as true increments, never a read-modify-write from a stale
/// snapshot, so concurrent feedback for different alerts stays correct.
pub struct LearningStore {
    profiles: RwLock<HashMap<String, TenantLearningProfile>>,
}

impl LearningStore {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot for a tenant; a default profile when none exists yet.
    pub fn get(&self, tenant_id: &str) -> TenantLearningProfile {
        self.profiles
            .read()
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| TenantLearningProfile {
                tenant_id: tenant_id.into(),
                ..Default::default()
            })
    }

    pub fn update<F>(&self, tenant_id: &str, mutate: F) -> TenantLearningProfile
    where
        F: FnOnce(&mut TenantLearningProfile),
    {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantLearningProfile {
                tenant_id: tenant_id.into(),
                ..Default::default()
            });
        mutate(profile);
        profile.clone()
    }

    /// Counts one received alert against the tenant.
    pub fn note_alert(&self, tenant_id: &str) {
        self.update(tenant_id, |p| p.total_alerts += 1);
    }
}

impl Default for LearningStore {
    fn default() -> Self {
        Self::new()
    }
}
