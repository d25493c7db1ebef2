//! # Alert Pipeline — Facade and bounded dispatch
//!
//! `AlertPipeline` wires the engines together and exposes the full event
//! path as one call. `WorkerPool` puts a bounded queue in front of it:
//! classified records are accepted with `try_send`, so when the queue is
//! full the producer gets an immediate backpressure error instead of an
//! unbounded buffer quietly growing.

use crate::delivery::{DeliveryChannelRouter, EmailTransport, SmsTransport, TicketTransport};
use crate::distributor::AlertDistributor;
use crate::escalation::EscalationTracker;
use crate::feedback::FeedbackLearningEngine;
use crate::ingest::EventIngestor;
use crate::matcher::GeospatialMatcher;
use crate::store::{AlertStore, EventStore, LearningStore, ProfileRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::config::VigilConfig;
use vigil_core::types::{ClassifiedEventRecord, ThreatEvent};
use vigil_core::{VigilError, VigilResult};
use vigil_realtime::RealtimeBroadcaster;

// ── Pipeline facade ──────────────────────────────────────────────────────────

pub struct AlertPipeline {
    events: Arc<EventStore>,
    alerts: Arc<AlertStore>,
    profiles: Arc<ProfileRegistry>,
    learning: Arc<LearningStore>,
    ingestor: EventIngestor,
    matcher: GeospatialMatcher,
    distributor: AlertDistributor,
    router: Arc<DeliveryChannelRouter>,
    escalation: EscalationTracker,
    feedback: FeedbackLearningEngine,
}

impl AlertPipeline {
    /// The full inbound path: validate, match against every active profile,
    /// and create one alert per match (delivery runs on spawned tasks).
    /// Returns the stored event and the ids of alerts created by this call.
    pub fn process_event(
        &self,
        record: ClassifiedEventRecord,
    ) -> VigilResult<(ThreatEvent, Vec<u64>)> {
        let event = self.ingestor.ingest(record)?;
        let matched = self.matcher.match_event(&event, &self.profiles.active());
        let created = self.distributor.distribute(&event, &matched);
        info!(
            event_id = event.id,
            matched = matched.len(),
            alerts_created = created.len(),
            "Event processed"
        );
        Ok((event, created))
    }

    pub fn events(&self) -> &EventStore { &self.events }
    pub fn alerts(&self) -> &AlertStore { &self.alerts }
    pub fn profiles(&self) -> &ProfileRegistry { &self.profiles }
    pub fn learning(&self) -> &LearningStore { &self.learning }
    pub fn router(&self) -> &DeliveryChannelRouter { &self.router }
    pub fn escalation(&self) -> &EscalationTracker { &self.escalation }
    pub fn feedback(&self) -> &FeedbackLearningEngine { &self.feedback }

    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            events_accepted: self.ingestor.total_accepted(),
            events_rejected: self.ingestor.total_rejected(),
            alerts_created: self.distributor.total_created(),
            duplicates_suppressed: self.distributor.duplicates_suppressed(),
            alerts_sent: self.router.total_sent(),
            alerts_failed: self.router.total_failed(),
            alerts_suppressed: self.router.total_suppressed(),
            tickets_created: self.router.tickets_created(),
            escalations_recorded: self.escalation.total_recorded(),
            responses_recorded: self.feedback.total_responses(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineReport {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub alerts_created: u64,
    pub duplicates_suppressed: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub alerts_suppressed: u64,
    pub tickets_created: u64,
    pub escalations_recorded: u64,
    pub responses_recorded: u64,
}

// ── Builder ──────────────────────────────────────────────────────────────────

pub struct PipelineBuilder {
    config: VigilConfig,
    broadcaster: Option<Arc<RealtimeBroadcaster>>,
    sms: Option<Arc<dyn SmsTransport>>,
    email: Option<Arc<dyn EmailTransport>>,
    ticketing: Option<Arc<dyn TicketTransport>>,
}

impl PipelineBuilder {
    pub fn new(config: VigilConfig) -> Self {
        Self {
            config,
            broadcaster: None,
            sms: None,
            email: None,
            ticketing: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<RealtimeBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_sms(mut self, sms: Arc<dyn SmsTransport>) -> Self {
        self.sms = Some(sms);
        self
    }

    pub fn with_email(mut self, email: Arc<dyn EmailTransport>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn with_ticketing(mut self, ticketing: Arc<dyn TicketTransport>) -> Self {
        self.ticketing = Some(ticketing);
        self
    }

    pub fn build(self) -> Arc<AlertPipeline> {
        let events = Arc::new(EventStore::new());
        let alerts = Arc::new(AlertStore::new());
        let profiles = Arc::new(ProfileRegistry::new());
        let learning = Arc::new(LearningStore::new());

        let mut router = DeliveryChannelRouter::new(alerts.clone())
            .with_channel_timeout(Duration::from_secs(self.config.delivery.channel_timeout_secs));
        if let Some(broadcaster) = self.broadcaster.clone() {
            router = router.with_broadcaster(broadcaster);
        }
        if let Some(sms) = self.sms {
            router = router.with_sms(sms);
        }
        if let Some(email) = self.email {
            router = router.with_email(email);
        }
        if let Some(ticketing) = self.ticketing {
            router = router.with_ticketing(ticketing);
        }
        let router = Arc::new(router);

        let mut escalation = EscalationTracker::new();
        let mut feedback =
            FeedbackLearningEngine::new(alerts.clone(), events.clone(), learning.clone());
        if let Some(broadcaster) = self.broadcaster {
            escalation = escalation.with_realtime(broadcaster.clone(), alerts.clone());
            feedback = feedback.with_broadcaster(broadcaster);
        }

        Arc::new(AlertPipeline {
            ingestor: EventIngestor::new(events.clone()),
            matcher: GeospatialMatcher::new(learning.clone()),
            distributor: AlertDistributor::new(alerts.clone(), learning.clone())
                .with_router(router.clone()),
            router,
            escalation,
            feedback,
            events,
            alerts,
            profiles,
            learning,
        })
    }
}

// ── Worker pool ──────────────────────────────────────────────────────────────

/// Bounded dispatch queue in front of the pipeline. `submit` never blocks:
/// a full queue is reported back to the producer immediately.
pub struct WorkerPool {
    tx: mpsc::Sender<ClassifiedEventRecord>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(pipeline: Arc<AlertPipeline>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<ClassifiedEventRecord>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    debug!(worker_id, "Dispatch worker started");
                    loop {
                        let record = { rx.lock().await.recv().await };
                        let Some(record) = record else { break };
                        // A rejected record is already logged at the boundary
                        // and must not take the worker down.
                        if let Err(e) = pipeline.process_event(record) {
                            warn!(worker_id, error = %e, "Record dropped");
                        }
                    }
                    debug!(worker_id, "Dispatch worker stopped");
                })
            })
            .collect();

        info!(capacity, workers, "Worker pool started");
        Self {
            tx,
            capacity,
            workers: handles,
        }
    }

    /// Enqueue a classified record for processing. Fails fast with a
    /// backpressure error when the queue is at capacity.
    pub fn submit(&self, record: ClassifiedEventRecord) -> VigilResult<()> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => VigilError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => {
                VigilError::Other("dispatch queue closed".into())
            }
        })
    }

    pub fn capacity(&self) -> usize { self.capacity }

    /// Close the queue and wait for in-flight records to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}
