//! Inbound boundary for classifier output.
//!
//! Structural validation only: unknown enum values, out-of-range confidence,
//! and inverted time windows are rejected and logged. A rejected record
//! never aborts processing of other records, and classification correctness
//! is not second-guessed here.

use crate::store::EventStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use vigil_core::types::{ClassifiedEventRecord, ThreatEvent};
use vigil_core::VigilResult;

pub struct EventIngestor {
    events: Arc<EventStore>,
    total_accepted: AtomicU64,
    total_rejected: AtomicU64,
}

impl EventIngestor {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self {
            events,
            total_accepted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Validate a raw classified record and store it as a typed event.
    pub fn ingest(&self, record: ClassifiedEventRecord) -> VigilResult<ThreatEvent> {
        let (category, severity) = match record.validate() {
            Ok(parsed) => parsed,
            Err(e) => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(source = %record.source_id, error = %e, "Rejected classified event");
                return Err(e);
            }
        };

        let event = self.events.insert(ThreatEvent {
            id: 0,
            source_id: record.source_id,
            category,
            severity,
            confidence: record.confidence,
            location: record.location,
            affected_area: record.affected_area,
            impact_radius_km: record.impact_radius_km,
            starts_at: record.event_start_time,
            ends_at: record.event_end_time,
        });

        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_id = event.id,
            category = ?event.category,
            severity = %event.severity,
            confidence = event.confidence,
            "Classified event accepted"
        );
        Ok(event)
    }

    pub fn total_accepted(&self) -> u64 { self.total_accepted.load(Ordering::Relaxed) }
    pub fn total_rejected(&self) -> u64 { self.total_rejected.load(Ordering::Relaxed) }
}
