//! # Delivery Channel Router — Urgency-tiered, best-effort fan-out
//!
//! Selects channels from the alert's urgency tier, runs each attempted
//! channel in parallel under a bounded timeout, and applies a single atomic
//! status transition once every attempt has finished:
//!
//! - IMMEDIATE → realtime push + SMS + email
//! - RAPID     → realtime push + email
//! - STANDARD  → email
//! - DIGEST    → nothing synchronous (queued for the external digest flush)
//! - DISABLED  → alert suppressed
//!
//! A failure in one channel never prevents delivery through the others; the
//! alert records exactly the channels that succeeded. This layer does not
//! retry — an outer sweep may re-invoke the router on FAILED alerts.

use crate::store::AlertStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vigil_core::types::{
    DeliveryChannel, DeliveryStatus, IntelligenceAlert, Severity, TenantMonitoringProfile, Urgency,
};
use vigil_core::{VigilError, VigilResult};
use vigil_realtime::{RealtimeBroadcaster, UpdateData, UpdateType};

// ── Outbound transport boundaries ────────────────────────────────────────────

/// SMS sink. Implementations are thin vendor wrappers; the router treats
/// the whole contact list as one send.
pub trait SmsTransport: Send + Sync {
    fn send(&self, numbers: &[String], message: &str) -> Result<(), String>;
}

/// Email sink, one call per recipient.
pub trait EmailTransport: Send + Sync {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Work-order ticketing sink. Returns the created ticket id.
pub trait TicketTransport: Send + Sync {
    fn create_ticket(
        &self,
        tenant_id: &str,
        title: &str,
        priority: Severity,
        metadata: &HashMap<String, String>,
    ) -> Result<u64, String>;
}

// ── Router ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RouterReport {
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_suppressed: u64,
    pub digest_queued: usize,
    pub tickets_created: u64,
}

pub struct DeliveryChannelRouter {
    alerts: Arc<AlertStore>,
    broadcaster: Option<Arc<RealtimeBroadcaster>>,
    sms: Option<Arc<dyn SmsTransport>>,
    email: Option<Arc<dyn EmailTransport>>,
    ticketing: Option<Arc<dyn TicketTransport>>,
    channel_timeout: Duration,
    /// Alerts waiting for the external periodic digest flush.
    digest_queue: RwLock<Vec<u64>>,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    total_suppressed: AtomicU64,
    tickets_created: AtomicU64,
}

impl DeliveryChannelRouter {
    pub fn new(alerts: Arc<AlertStore>) -> Self {
        Self {
            alerts,
            broadcaster: None,
            sms: None,
            email: None,
            ticketing: None,
            channel_timeout: Duration::from_secs(5),
            digest_queue: RwLock::new(Vec::new()),
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_suppressed: AtomicU64::new(0),
            tickets_created: AtomicU64::new(0),
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

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    /// Channels a given urgency tier attempts synchronously.
    pub fn channels_for(urgency: Urgency) -> &'static [DeliveryChannel] {
        match urgency {
            Urgency::Immediate => &[DeliveryChannel::Realtime, DeliveryChannel::Sms, DeliveryChannel::Email],
            Urgency::Rapid => &[DeliveryChannel::Realtime, DeliveryChannel::Email],
            Urgency::Standard => &[DeliveryChannel::Email],
            Urgency::Digest | Urgency::Disabled => &[],
        }
    }

    // ── Delivery ─────────────────────────────────────────────────────────

    /// Deliver one alert across its selected channels and apply the final
    /// status transition. Safe to re-invoke on FAILED alerts (the external
    /// re-delivery sweep); SENT/DELIVERED/SUPPRESSED alerts are untouched.
    pub async fn deliver(
        &self,
        alert_id: u64,
        profile: &TenantMonitoringProfile,
    ) -> VigilResult<DeliveryStatus> {
        let alert = self
            .alerts
            .get(alert_id)
            .ok_or(VigilError::UnknownAlert(alert_id))?;

        match alert.status {
            DeliveryStatus::Pending | DeliveryStatus::Failed => {}
            status => return Ok(status),
        }

        match alert.urgency {
            Urgency::Disabled => {
                let updated = self.alerts.update(alert_id, |a| {
                    a.status = DeliveryStatus::Suppressed;
                })?;
                self.total_suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(alert_id, "Alert suppressed (urgency disabled)");
                return Ok(updated.status);
            }
            Urgency::Digest => {
                let mut queue = self.digest_queue.write();
                // Re-invocations on a still-PENDING digest alert must not
                // hand the flush job duplicates.
                if !queue.contains(&alert_id) {
                    queue.push(alert_id);
                }
                debug!(alert_id, "Alert queued for digest flush");
                return Ok(DeliveryStatus::Pending);
            }
            _ => {}
        }

        let selected = self.select_channels(&alert, profile);
        if selected.is_empty() {
            // Every tier channel is disabled on this profile; nothing will
            // ever go out synchronously for this alert.
            let updated = self.alerts.update(alert_id, |a| {
                a.status = DeliveryStatus::Suppressed;
            })?;
            self.total_suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(alert_id, "Alert suppressed (no enabled channels)");
            return Ok(updated.status);
        }

        let outcomes = self.attempt_channels(&alert, profile, &selected).await;

        // Ticketing runs with the status update, not as a delivery channel.
        // A re-invocation on a FAILED alert must not open a second ticket.
        let ticket = if alert.severity >= Severity::High
            && profile.ticketing_enabled
            && alert.ticket_id.is_none()
        {
            self.create_ticket(&alert, profile).await
        } else {
            None
        };

        let mut succeeded: Vec<DeliveryChannel> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        for (channel, result) in outcomes {
            match result {
                Ok(()) => succeeded.push(channel),
                Err(reason) => failures.push(format!("{}: {}", channel, reason)),
            }
        }

        let now = chrono::Utc::now().timestamp();
        let any_success = !succeeded.is_empty();
        let ticket_id = ticket;
        let mut applied = false;
        let updated = self.alerts.update(alert_id, |a| {
            // Re-check under the lock: a concurrent invocation may have
            // completed since the gate above, and SENT must never be
            // overwritten by a late all-fail outcome.
            if matches!(a.status, DeliveryStatus::Pending | DeliveryStatus::Failed) {
                applied = true;
                if any_success {
                    a.status = DeliveryStatus::Sent;
                    a.delivered_at = Some(now);
                    a.delivery_error = None;
                    a.channels_delivered = succeeded;
                } else {
                    a.status = DeliveryStatus::Failed;
                    a.delivery_error = Some(failures.join("; "));
                }
            }
            // The ticket succeeded regardless of the notification outcome.
            if ticket_id.is_some() {
                a.ticket_id = ticket_id;
                if !a.channels_delivered.contains(&DeliveryChannel::Ticket) {
                    a.channels_delivered.push(DeliveryChannel::Ticket);
                }
            }
        })?;

        if applied {
            match updated.status {
                DeliveryStatus::Sent => {
                    self.total_sent.fetch_add(1, Ordering::Relaxed);
                    info!(
                        alert_id,
                        tenant = %updated.tenant_id,
                        channels = ?updated.channels_delivered,
                        "Alert delivered"
                    );
                }
                DeliveryStatus::Failed => {
                    self.total_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        alert_id,
                        tenant = %updated.tenant_id,
                        error = updated.delivery_error.as_deref().unwrap_or(""),
                        "All delivery channels failed"
                    );
                }
                _ => {}
            }
        }

        if let (Some(ticket_id), Some(broadcaster)) = (updated.ticket_id, self.broadcaster.as_ref())
        {
            let data = UpdateData {
                ticket_id: Some(ticket_id),
                status: Some(updated.status),
                ..Default::default()
            };
            broadcaster.broadcast_update(&updated.tenant_id, alert_id, UpdateType::TicketCreated, data);
        }

        Ok(updated.status)
    }

    /// Urgency tier intersected with the profile's channel enable flags.
    fn select_channels(
        &self,
        alert: &IntelligenceAlert,
        profile: &TenantMonitoringProfile,
    ) -> Vec<DeliveryChannel> {
        Self::channels_for(alert.urgency)
            .iter()
            .copied()
            .filter(|channel| match channel {
                DeliveryChannel::Realtime => profile.channels.realtime,
                DeliveryChannel::Sms => profile.channels.sms,
                DeliveryChannel::Email => profile.channels.email,
                DeliveryChannel::Ticket => false,
            })
            .collect()
    }

    /// Run every selected channel in parallel; join before returning so the
    /// status transition sees all outcomes.
    async fn attempt_channels(
        &self,
        alert: &IntelligenceAlert,
        profile: &TenantMonitoringProfile,
        selected: &[DeliveryChannel],
    ) -> Vec<(DeliveryChannel, Result<(), String>)> {
        let mut outcomes = Vec::with_capacity(selected.len());
        let mut pending = Vec::new();

        for &channel in selected {
            match channel {
                DeliveryChannel::Realtime => {
                    // In-process and non-blocking; zero connected subscribers
                    // counts as not-delivered on this channel, not an error.
                    let result = match self.broadcaster.as_ref() {
                        Some(b) if b.broadcast_alert(alert) > 0 => Ok(()),
                        Some(_) => Err("no connected subscribers".to_string()),
                        None => Err("no realtime backend configured".to_string()),
                    };
                    outcomes.push((channel, result));
                }
                DeliveryChannel::Sms => {
                    pending.push((channel, self.spawn_sms(alert, profile)));
                }
                DeliveryChannel::Email => {
                    pending.push((channel, self.spawn_email(alert, profile)));
                }
                DeliveryChannel::Ticket => {}
            }
        }

        for (channel, handle) in pending {
            let result = match tokio::time::timeout(self.channel_timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(format!("transport task failed: {}", join_err)),
                Err(_) => Err(format!("timed out after {:?}", self.channel_timeout)),
            };
            outcomes.push((channel, result));
        }
        outcomes
    }

    fn spawn_sms(
        &self,
        alert: &IntelligenceAlert,
        profile: &TenantMonitoringProfile,
    ) -> tokio::task::JoinHandle<Result<(), String>> {
        let transport = self.sms.clone();
        let numbers = profile.contacts.sms_numbers.clone();
        let message = format!(
            "[{}] {} alert {:.1} km from {}",
            alert.severity, alert.urgency, alert.distance_km, profile.name
        );
        tokio::task::spawn_blocking(move || {
            let transport = transport.ok_or_else(|| "no sms transport configured".to_string())?;
            if numbers.is_empty() {
                return Err("no sms contacts configured".to_string());
            }
            transport.send(&numbers, &message)
        })
    }

    fn spawn_email(
        &self,
        alert: &IntelligenceAlert,
        profile: &TenantMonitoringProfile,
    ) -> tokio::task::JoinHandle<Result<(), String>> {
        let transport = self.email.clone();
        let recipients = profile.contacts.email_addresses.clone();
        let subject = format!("[{}] Threat alert for {}", alert.severity, profile.name);
        let body = match serde_json::to_string_pretty(alert) {
            Ok(json) => json,
            Err(_) => format!("alert {}", alert.alert_id),
        };
        tokio::task::spawn_blocking(move || {
            let transport = transport.ok_or_else(|| "no email transport configured".to_string())?;
            if recipients.is_empty() {
                return Err("no email recipients configured".to_string());
            }
            let mut errors = Vec::new();
            let mut any_ok = false;
            for recipient in &recipients {
                match transport.send(recipient, &subject, &body) {
                    Ok(()) => any_ok = true,
                    Err(e) => errors.push(format!("{}: {}", recipient, e)),
                }
            }
            if any_ok {
                Ok(())
            } else {
                Err(errors.join(", "))
            }
        })
    }

    async fn create_ticket(
        &self,
        alert: &IntelligenceAlert,
        profile: &TenantMonitoringProfile,
    ) -> Option<u64> {
        let transport = self.ticketing.clone()?;
        let tenant_id = alert.tenant_id.clone();
        let title = format!(
            "{} threat alert near {} ({:.1} km)",
            alert.severity, profile.name, alert.distance_km
        );
        let priority = alert.severity;
        let mut metadata = HashMap::new();
        metadata.insert("alert_id".into(), alert.alert_id.to_string());
        metadata.insert("event_id".into(), alert.event_id.to_string());
        metadata.insert("profile_id".into(), alert.profile_id.to_string());
        metadata.insert("distance_km".into(), format!("{:.2}", alert.distance_km));

        let alert_id = alert.alert_id;
        let handle = tokio::task::spawn_blocking(move || {
            transport.create_ticket(&tenant_id, &title, priority, &metadata)
        });
        match tokio::time::timeout(self.channel_timeout, handle).await {
            Ok(Ok(Ok(ticket_id))) => {
                self.tickets_created.fetch_add(1, Ordering::Relaxed);
                info!(alert_id, ticket_id, "Work ticket created for high-severity alert");
                Some(ticket_id)
            }
            Ok(Ok(Err(e))) => {
                warn!(alert_id, error = %e, "Ticket creation failed");
                None
            }
            Ok(Err(join_err)) => {
                warn!(alert_id, error = %join_err, "Ticket task failed");
                None
            }
            Err(_) => {
                warn!(alert_id, "Ticket creation timed out");
                None
            }
        }
    }

    // ── Digest and stats ─────────────────────────────────────────────────

    /// Hand the queued digest alert ids to the external flush job.
    pub fn drain_digest(&self) -> Vec<u64> {
        std::mem::take(&mut *self.digest_queue.write())
    }

    pub fn digest_len(&self) -> usize { self.digest_queue.read().len() }
    pub fn total_sent(&self) -> u64 { self.total_sent.load(Ordering::Relaxed) }
    pub fn total_failed(&self) -> u64 { self.total_failed.load(Ordering::Relaxed) }
    pub fn total_suppressed(&self) -> u64 { self.total_suppressed.load(Ordering::Relaxed) }
    pub fn tickets_created(&self) -> u64 { self.tickets_created.load(Ordering::Relaxed) }

    pub fn report(&self) -> RouterReport {
        RouterReport {
            total_sent: self.total_sent(),
            total_failed: self.total_failed(),
            total_suppressed: self.total_suppressed(),
            digest_queued: self.digest_len(),
            tickets_created: self.tickets_created(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::{ChannelConfig, ContactInfo, OperatorResponse, UrgencyMap};
    use vigil_realtime::StaticTokenAuthorizer;

    struct OkSms;
    impl SmsTransport for OkSms {
        fn send(&self, _numbers: &[String], _message: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct FailingSms;
    impl SmsTransport for FailingSms {
        fn send(&self, _numbers: &[String], _message: &str) -> Result<(), String> {
            Err("gateway unreachable".into())
        }
    }

    struct OkEmail;
    impl EmailTransport for OkEmail {
        fn send(&self, _recipient: &str, _subject: &str, _body: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct FailingEmail;
    impl EmailTransport for FailingEmail {
        fn send(&self, _recipient: &str, _subject: &str, _body: &str) -> Result<(), String> {
            Err("smtp 554".into())
        }
    }

    struct CountingTickets(AtomicU64);
    impl TicketTransport for CountingTickets {
        fn create_ticket(
            &self,
            _tenant_id: &str,
            _title: &str,
            _priority: Severity,
            _metadata: &HashMap<String, String>,
        ) -> Result<u64, String> {
            Ok(self.0.fetch_add(1, Ordering::Relaxed) + 100)
        }
    }

    fn seeded_alert(store: &AlertStore, urgency: Urgency, severity: Severity) -> u64 {
        let (alert_id, created) = store.create_if_absent(1, 1, |id| IntelligenceAlert {
            alert_id: id,
            event_id: 1,
            profile_id: 1,
            tenant_id: "tenant-1".into(),
            severity,
            urgency,
            distance_km: 2.0,
            status: DeliveryStatus::Pending,
            channels_delivered: vec![],
            delivery_error: None,
            ticket_id: None,
            created_at: 0,
            delivered_at: None,
            response: OperatorResponse::NoResponse,
            response_note: None,
            responded_at: None,
        });
        assert!(created);
        alert_id
    }

    fn full_profile() -> TenantMonitoringProfile {
        TenantMonitoringProfile {
            profile_id: 1,
            tenant_id: "tenant-1".into(),
            name: "Miami HQ".into(),
            geofences: vec![],
            buffer_km: 5.0,
            categories: vec![],
            min_severity: Severity::Low,
            min_confidence: 0.5,
            urgency: UrgencyMap::default(),
            channels: ChannelConfig { realtime: true, sms: true, email: true },
            ticketing_enabled: false,
            contacts: ContactInfo {
                sms_numbers: vec!["+15550001".into()],
                email_addresses: vec!["ops@example.com".into()],
            },
            active: true,
        }
    }

    #[test]
    fn test_channel_selection_by_urgency() {
        assert_eq!(
            DeliveryChannelRouter::channels_for(Urgency::Immediate),
            &[DeliveryChannel::Realtime, DeliveryChannel::Sms, DeliveryChannel::Email]
        );
        assert_eq!(
            DeliveryChannelRouter::channels_for(Urgency::Rapid),
            &[DeliveryChannel::Realtime, DeliveryChannel::Email]
        );
        assert_eq!(
            DeliveryChannelRouter::channels_for(Urgency::Standard),
            &[DeliveryChannel::Email]
        );
        assert!(DeliveryChannelRouter::channels_for(Urgency::Digest).is_empty());
        assert!(DeliveryChannelRouter::channels_for(Urgency::Disabled).is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_still_sends() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Immediate, Severity::Critical);
        let router = DeliveryChannelRouter::new(store.clone())
            .with_sms(Arc::new(FailingSms))
            .with_email(Arc::new(OkEmail));

        let status = router.deliver(alert_id, &full_profile()).await.unwrap();
        assert_eq!(status, DeliveryStatus::Sent);

        let alert = store.get(alert_id).unwrap();
        assert_eq!(alert.channels_delivered, vec![DeliveryChannel::Email]);
        assert!(alert.delivered_at.is_some());
        assert!(alert.delivery_error.is_none());
    }

    #[tokio::test]
    async fn test_all_channels_fail_marks_failed() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Immediate, Severity::Critical);
        // No broadcaster and no subscribers, failing sms and email
        let router = DeliveryChannelRouter::new(store.clone())
            .with_sms(Arc::new(FailingSms))
            .with_email(Arc::new(FailingEmail));

        let status = router.deliver(alert_id, &full_profile()).await.unwrap();
        assert_eq!(status, DeliveryStatus::Failed);

        let alert = store.get(alert_id).unwrap();
        assert!(alert.channels_delivered.is_empty());
        let error = alert.delivery_error.unwrap();
        assert!(error.contains("sms"));
        assert!(error.contains("email"));
        assert_eq!(router.total_failed(), 1);
    }

    #[tokio::test]
    async fn test_failed_alert_can_be_redelivered() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Standard, Severity::Medium);

        let failing = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(FailingEmail));
        assert_eq!(failing.deliver(alert_id, &full_profile()).await.unwrap(), DeliveryStatus::Failed);

        let working = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(OkEmail));
        assert_eq!(working.deliver(alert_id, &full_profile()).await.unwrap(), DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn test_sent_alert_not_redelivered() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Standard, Severity::Medium);
        let router = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(OkEmail));

        assert_eq!(router.deliver(alert_id, &full_profile()).await.unwrap(), DeliveryStatus::Sent);
        assert_eq!(router.deliver(alert_id, &full_profile()).await.unwrap(), DeliveryStatus::Sent);
        assert_eq!(router.total_sent(), 1, "second invocation must be a no-op");
    }

    #[tokio::test]
    async fn test_disabled_urgency_suppresses() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Disabled, Severity::Info);
        let router = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(OkEmail));

        assert_eq!(router.deliver(alert_id, &full_profile()).await.unwrap(), DeliveryStatus::Suppressed);
        assert_eq!(router.total_suppressed(), 1);
    }

    #[tokio::test]
    async fn test_digest_queues_without_sending() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Digest, Severity::Low);
        let router = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(OkEmail));

        assert_eq!(router.deliver(alert_id, &full_profile()).await.unwrap(), DeliveryStatus::Pending);
        assert_eq!(router.drain_digest(), vec![alert_id]);
        assert_eq!(router.digest_len(), 0);
    }

    #[tokio::test]
    async fn test_ticket_created_for_high_severity() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Immediate, Severity::Critical);
        let router = DeliveryChannelRouter::new(store.clone())
            .with_sms(Arc::new(OkSms))
            .with_email(Arc::new(OkEmail))
            .with_ticketing(Arc::new(CountingTickets(AtomicU64::new(0))));

        let mut profile = full_profile();
        profile.ticketing_enabled = true;

        router.deliver(alert_id, &profile).await.unwrap();
        let alert = store.get(alert_id).unwrap();
        assert_eq!(alert.ticket_id, Some(100));
        assert!(alert.channels_delivered.contains(&DeliveryChannel::Ticket));
        assert_eq!(router.tickets_created(), 1);
    }

    #[tokio::test]
    async fn test_ticket_recorded_when_all_channels_fail() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Immediate, Severity::Critical);
        // No broadcaster, no sms transport, failing email: every
        // notification channel fails but the ticket goes through.
        let router = DeliveryChannelRouter::new(store.clone())
            .with_email(Arc::new(FailingEmail))
            .with_ticketing(Arc::new(CountingTickets(AtomicU64::new(0))));

        let mut profile = full_profile();
        profile.ticketing_enabled = true;

        let status = router.deliver(alert_id, &profile).await.unwrap();
        assert_eq!(status, DeliveryStatus::Failed);

        let alert = store.get(alert_id).unwrap();
        assert_eq!(alert.ticket_id, Some(100));
        assert_eq!(alert.channels_delivered, vec![DeliveryChannel::Ticket]);
    }

    #[tokio::test]
    async fn test_failed_alert_not_reticketed_on_redelivery() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Standard, Severity::High);
        let router = DeliveryChannelRouter::new(store.clone())
            .with_email(Arc::new(FailingEmail))
            .with_ticketing(Arc::new(CountingTickets(AtomicU64::new(0))));

        let mut profile = full_profile();
        profile.ticketing_enabled = true;

        assert_eq!(router.deliver(alert_id, &profile).await.unwrap(), DeliveryStatus::Failed);
        assert_eq!(router.deliver(alert_id, &profile).await.unwrap(), DeliveryStatus::Failed);
        assert_eq!(router.tickets_created(), 1);
        assert_eq!(store.get(alert_id).unwrap().ticket_id, Some(100));
    }

    #[tokio::test]
    async fn test_late_failure_does_not_overwrite_sent() {
        // Simulates a concurrent invocation finishing first: the transport
        // observes the alert flip to SENT mid-attempt, then fails.
        struct SentMarkingEmail {
            store: Arc<AlertStore>,
            alert_id: u64,
        }
        impl EmailTransport for SentMarkingEmail {
            fn send(&self, _recipient: &str, _subject: &str, _body: &str) -> Result<(), String> {
                let _ = self.store.update(self.alert_id, |a| {
                    a.status = DeliveryStatus::Sent;
                    a.delivered_at = Some(1);
                    a.channels_delivered = vec![DeliveryChannel::Realtime];
                });
                Err("smtp timeout".into())
            }
        }

        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Standard, Severity::Medium);
        let router = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(
            SentMarkingEmail { store: store.clone(), alert_id },
        ));

        let status = router.deliver(alert_id, &full_profile()).await.unwrap();
        assert_eq!(status, DeliveryStatus::Sent);
        assert_eq!(router.total_failed(), 0);

        let alert = store.get(alert_id).unwrap();
        assert_eq!(alert.status, DeliveryStatus::Sent);
        assert_eq!(alert.channels_delivered, vec![DeliveryChannel::Realtime]);
        assert!(alert.delivery_error.is_none());
    }

    #[tokio::test]
    async fn test_digest_requeue_not_duplicated() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Digest, Severity::Low);
        let router = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(OkEmail));

        router.deliver(alert_id, &full_profile()).await.unwrap();
        router.deliver(alert_id, &full_profile()).await.unwrap();
        assert_eq!(router.drain_digest(), vec![alert_id]);
    }

    #[tokio::test]
    async fn test_no_ticket_below_high_severity() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Standard, Severity::Medium);
        let router = DeliveryChannelRouter::new(store.clone())
            .with_email(Arc::new(OkEmail))
            .with_ticketing(Arc::new(CountingTickets(AtomicU64::new(0))));

        let mut profile = full_profile();
        profile.ticketing_enabled = true;

        router.deliver(alert_id, &profile).await.unwrap();
        assert_eq!(store.get(alert_id).unwrap().ticket_id, None);
        assert_eq!(router.tickets_created(), 0);
    }

    #[tokio::test]
    async fn test_realtime_counts_when_subscribed() {
        let auth = StaticTokenAuthorizer::new().with_token("t", "tenant-1");
        let broadcaster = Arc::new(RealtimeBroadcaster::new(Arc::new(auth), 16));
        let _conn = broadcaster.connect("t").unwrap();

        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Rapid, Severity::High);
        let router = DeliveryChannelRouter::new(store.clone())
            .with_broadcaster(broadcaster)
            .with_email(Arc::new(FailingEmail));

        let status = router.deliver(alert_id, &full_profile()).await.unwrap();
        assert_eq!(status, DeliveryStatus::Sent);
        assert_eq!(
            store.get(alert_id).unwrap().channels_delivered,
            vec![DeliveryChannel::Realtime]
        );
    }

    #[tokio::test]
    async fn test_all_profile_channels_disabled_suppresses() {
        let store = Arc::new(AlertStore::new());
        let alert_id = seeded_alert(&store, Urgency::Standard, Severity::Medium);
        let router = DeliveryChannelRouter::new(store.clone()).with_email(Arc::new(OkEmail));

        let mut profile = full_profile();
        profile.channels = ChannelConfig { realtime: false, sms: false, email: false };

        assert_eq!(router.deliver(alert_id, &profile).await.unwrap(), DeliveryStatus::Suppressed);
    }
}
