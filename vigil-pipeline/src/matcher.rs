//! # Geospatial Matcher — Profile fan-out for classified events
//!
//! Pure read-only scan: one event against the full set of active tenant
//! monitoring profiles, four gates per profile, no side effects.
//!
//! Gates, in order:
//! 1. Category allow-list (empty list allows all categories)
//! 2. Minimum severity (numeric ranking, CRITICAL highest)
//! 3. Minimum confidence, scaled by the tenant's learned category sensitivity
//! 4. Geospatial containment against the geofences expanded by the buffer
//!    radius (learned effective radius overrides the configured buffer)
//!
//! An event with no location matches nothing; that is a valid outcome,
//! logged at debug level, never an error — CYBER events are routinely
//! non-geospatial.

use crate::store::LearningStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use vigil_core::types::{TenantMonitoringProfile, ThreatEvent};

pub struct GeospatialMatcher {
    learning: Arc<LearningStore>,
    events_matched: AtomicU64,
    events_without_location: AtomicU64,
    profiles_evaluated: AtomicU64,
}

impl GeospatialMatcher {
    pub fn new(learning: Arc<LearningStore>) -> Self {
        Self {
            learning,
            events_matched: AtomicU64::new(0),
            events_without_location: AtomicU64::new(0),
            profiles_evaluated: AtomicU64::new(0),
        }
    }

    /// Returns the subset of `profiles` in scope for `event`.
    pub fn match_event(
        &self,
        event: &ThreatEvent,
        profiles: &[TenantMonitoringProfile],
    ) -> Vec<TenantMonitoringProfile> {
        let location = match event.location {
            Some(loc) => loc,
            None => {
                self.events_without_location.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = event.id, category = ?event.category, "Event has no location, no geospatial match");
                return Vec::new();
            }
        };

        let mut matched = Vec::new();
        for profile in profiles {
            self.profiles_evaluated.fetch_add(1, Ordering::Relaxed);
            if !profile.active {
                continue;
            }
            if !profile.allows_category(event.category) {
                continue;
            }
            if event.severity < profile.min_severity {
                continue;
            }

            let learned = self.learning.get(&profile.tenant_id);
            let sensitivity = learned.sensitivity_for(event.category);
            // Higher sensitivity lowers the effective confidence bar.
            let min_confidence = (profile.min_confidence / sensitivity).clamp(0.0, 1.0);
            if event.confidence < min_confidence {
                continue;
            }

            let buffer_km = learned.effective_radius_km.unwrap_or(profile.buffer_km)
                + event.impact_radius_km.unwrap_or(0.0);
            let in_scope = profile.geofences.iter().any(|fence| {
                if let Some(ref area) = event.affected_area {
                    // The buffer expands the fence for the affected-area
                    // path too: a polygon clear of the fence but inside
                    // the buffer band is still in scope.
                    if area.intersects(fence)
                        || area
                            .vertices
                            .iter()
                            .any(|v| fence.distance_to_km(v) <= buffer_km)
                    {
                        return true;
                    }
                }
                fence.distance_to_km(&location) <= buffer_km
            });
            if !in_scope {
                continue;
            }

            matched.push(profile.clone());
        }

        if !matched.is_empty() {
            self.events_matched.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = event.id, matches = matched.len(), "Event matched tenant profiles");
        }
        matched
    }

    pub fn events_matched(&self) -> u64 { self.events_matched.load(Ordering::Relaxed) }
    pub fn events_without_location(&self) -> u64 { self.events_without_location.load(Ordering::Relaxed) }
    pub fn profiles_evaluated(&self) -> u64 { self.profiles_evaluated.load(Ordering::Relaxed) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::geo::{GeoPoint, GeoPolygon};
    use vigil_core::types::{ChannelConfig, ContactInfo, Severity, ThreatCategory, UrgencyMap};

    fn miami_fence() -> GeoPolygon {
        GeoPolygon::new(vec![
            GeoPoint::new(25.5, -80.5),
            GeoPoint::new(25.5, -79.9),
            GeoPoint::new(26.0, -79.9),
            GeoPoint::new(26.0, -80.5),
        ])
    }

    fn profile(profile_id: u64) -> TenantMonitoringProfile {
        TenantMonitoringProfile {
            profile_id,
            tenant_id: format!("tenant-{}", profile_id),
            name: "Miami HQ".into(),
            geofences: vec![miami_fence()],
            buffer_km: 10.0,
            categories: vec![],
            min_severity: Severity::Medium,
            min_confidence: 0.7,
            urgency: UrgencyMap::default(),
            channels: ChannelConfig::default(),
            ticketing_enabled: false,
            contacts: ContactInfo::default(),
            active: true,
        }
    }

    fn weather_event() -> ThreatEvent {
        ThreatEvent {
            id: 1,
            source_id: "nws".into(),
            category: ThreatCategory::Weather,
            severity: Severity::Critical,
            confidence: 0.9,
            location: Some(GeoPoint::new(25.7617, -80.1918)),
            affected_area: None,
            impact_radius_km: None,
            starts_at: 0,
            ends_at: None,
        }
    }

    fn matcher() -> GeospatialMatcher {
        GeospatialMatcher::new(Arc::new(LearningStore::new()))
    }

    #[test]
    fn test_output_is_subset_of_input() {
        let m = matcher();
        let profiles = vec![profile(1), profile(2), profile(3)];
        let matched = m.match_event(&weather_event(), &profiles);
        assert!(matched.len() <= profiles.len());
        for hit in &matched {
            assert!(profiles.iter().any(|p| p.profile_id == hit.profile_id));
        }
        assert_eq!(matched.len(), 3);
    }

    #[test]
    fn test_empty_allow_list_never_excluded_on_category() {
        let m = matcher();
        let mut event = weather_event();
        event.category = ThreatCategory::Terrorism;
        let matched = m.match_event(&event, &[profile(1)]);
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_category_gate() {
        let m = matcher();
        let mut p = profile(1);
        p.categories = vec![ThreatCategory::Cyber, ThreatCategory::Crime];
        assert!(m.match_event(&weather_event(), &[p.clone()]).is_empty());

        p.categories = vec![ThreatCategory::Weather];
        assert_eq!(m.match_event(&weather_event(), &[p]).len(), 1);
    }

    #[test]
    fn test_severity_gate() {
        let m = matcher();
        let mut event = weather_event();
        event.severity = Severity::Low;
        assert!(m.match_event(&event, &[profile(1)]).is_empty());

        event.severity = Severity::Medium; // equal to minimum passes
        assert_eq!(m.match_event(&event, &[profile(1)]).len(), 1);
    }

    #[test]
    fn test_confidence_gate() {
        let m = matcher();
        let mut p = profile(1);
        p.min_confidence = 0.95;
        assert!(m.match_event(&weather_event(), &[p]).is_empty());
    }

    #[test]
    fn test_geospatial_gate() {
        let m = matcher();
        let mut event = weather_event();
        event.location = Some(GeoPoint::new(40.7128, -74.0060)); // NYC, far outside
        assert!(m.match_event(&event, &[profile(1)]).is_empty());
    }

    #[test]
    fn test_buffer_radius_expands_geofence() {
        let m = matcher();
        let mut event = weather_event();
        // Just north of the fence's top edge (~5.5 km out), inside the 10 km buffer
        event.location = Some(GeoPoint::new(26.05, -80.2));
        assert_eq!(m.match_event(&event, &[profile(1)]).len(), 1);

        let mut tight = profile(2);
        tight.buffer_km = 1.0;
        assert!(m.match_event(&event, &[tight]).is_empty());
    }

    #[test]
    fn test_affected_area_polygon_intersection() {
        let m = matcher();
        let mut event = weather_event();
        // Storm cell polygon overlapping the fence, event point far away
        event.location = Some(GeoPoint::new(24.0, -82.0));
        event.affected_area = Some(GeoPolygon::new(vec![
            GeoPoint::new(25.6, -80.3),
            GeoPoint::new(25.6, -80.0),
            GeoPoint::new(25.9, -80.0),
            GeoPoint::new(25.9, -80.3),
        ]));
        assert_eq!(m.match_event(&event, &[profile(1)]).len(), 1);
    }

    #[test]
    fn test_buffer_expands_affected_area_intersection() {
        let m = matcher();
        let mut event = weather_event();
        // Storm cell ~5 km north of the fence's top edge, event point far
        // offshore: inside the 10 km buffer band, clear of a 1 km one
        event.location = Some(GeoPoint::new(30.0, -80.2));
        event.affected_area = Some(GeoPolygon::new(vec![
            GeoPoint::new(26.04, -80.3),
            GeoPoint::new(26.04, -80.1),
            GeoPoint::new(26.09, -80.1),
            GeoPoint::new(26.09, -80.3),
        ]));
        assert_eq!(m.match_event(&event, &[profile(1)]).len(), 1);

        let mut tight = profile(2);
        tight.buffer_km = 1.0;
        assert!(m.match_event(&event, &[tight]).is_empty());
    }

    #[test]
    fn test_no_location_is_valid_no_match() {
        let m = matcher();
        let mut event = weather_event();
        event.category = ThreatCategory::Cyber;
        event.location = None;
        assert!(m.match_event(&event, &[profile(1)]).is_empty());
        assert_eq!(m.events_without_location(), 1);
    }

    #[test]
    fn test_inactive_profile_skipped() {
        let m = matcher();
        let mut p = profile(1);
        p.active = false;
        assert!(m.match_event(&weather_event(), &[p]).is_empty());
    }

    #[test]
    fn test_learned_sensitivity_lowers_confidence_bar() {
        let learning = Arc::new(LearningStore::new());
        learning.update("tenant-1", |p| {
            p.category_sensitivity.insert(ThreatCategory::Weather, 1.4);
        });
        let m = GeospatialMatcher::new(learning);

        let mut p = profile(1);
        p.min_confidence = 0.95; // 0.95 / 1.4 ≈ 0.68 < 0.9 event confidence
        assert_eq!(m.match_event(&weather_event(), &[p]).len(), 1);
    }

    #[test]
    fn test_learned_radius_overrides_buffer() {
        let learning = Arc::new(LearningStore::new());
        learning.update("tenant-1", |p| p.effective_radius_km = Some(0.1));
        let m = GeospatialMatcher::new(learning);

        let mut event = weather_event();
        event.location = Some(GeoPoint::new(26.05, -80.2)); // ~5.5 km outside fence
        assert!(m.match_event(&event, &[profile(1)]).is_empty());
    }
}
