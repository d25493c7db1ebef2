//! End-to-end integration tests for Vigil
//!
//! These tests exercise real multi-component scenarios:
//! - Classified event → geospatial match → alert → multi-channel delivery
//! - Confidence and severity gating at the profile boundary
//! - Tenant-isolated realtime push
//! - Ticketing for high-severity alerts
//! - Operator feedback flowing back into the learning profile
//! - Escalation stage broadcasts

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil_core::config::VigilConfig;
use vigil_core::geo::{GeoPoint, GeoPolygon};
use vigil_core::types::{
    ClassifiedEventRecord, ContactInfo, DeliveryChannel, DeliveryStatus, Severity,
    TenantMonitoringProfile, ThreatCategory,
};
use vigil_pipeline::delivery::{EmailTransport, SmsTransport, TicketTransport};
use vigil_pipeline::{AlertPipeline, PipelineBuilder};
use vigil_realtime::{RealtimeBroadcaster, RealtimeMessage, StaticTokenAuthorizer, UpdateType};

// ── Test transports ──────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingEmail {
    sent: Mutex<Vec<(String, String)>>,
}

impl EmailTransport for RecordingEmail {
    fn send(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
        Ok(())
    }
}

struct FailingSms;

impl SmsTransport for FailingSms {
    fn send(&self, _numbers: &[String], _message: &str) -> Result<(), String> {
        Err("gateway unreachable".into())
    }
}

struct FixedTicketing(u64);

impl TicketTransport for FixedTicketing {
    fn create_ticket(
        &self,
        _tenant_id: &str,
        _title: &str,
        _priority: Severity,
        _metadata: &HashMap<String, String>,
    ) -> Result<u64, String> {
        Ok(self.0)
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn miami_fence() -> GeoPolygon {
    GeoPolygon::new(vec![
        GeoPoint::new(25.5, -80.5),
        GeoPoint::new(25.5, -79.9),
        GeoPoint::new(26.0, -79.9),
        GeoPoint::new(26.0, -80.5),
    ])
}

fn la_fence() -> GeoPolygon {
    GeoPolygon::new(vec![
        GeoPoint::new(33.8, -118.5),
        GeoPoint::new(33.8, -118.0),
        GeoPoint::new(34.2, -118.0),
        GeoPoint::new(34.2, -118.5),
    ])
}

fn profile(profile_id: u64, tenant: &str, fence: GeoPolygon) -> TenantMonitoringProfile {
    TenantMonitoringProfile {
        profile_id,
        tenant_id: tenant.into(),
        name: format!("{} facility", tenant),
        geofences: vec![fence],
        buffer_km: 10.0,
        categories: vec![],
        min_severity: Severity::Medium,
        min_confidence: 0.7,
        urgency: Default::default(),
        channels: Default::default(),
        ticketing_enabled: false,
        contacts: ContactInfo {
            sms_numbers: vec!["+13055550100".into()],
            email_addresses: vec!["ops@example.com".into()],
        },
        active: true,
    }
}

fn hurricane(confidence: f64) -> ClassifiedEventRecord {
    ClassifiedEventRecord {
        source_id: "nws-atlantic".into(),
        category: "WEATHER".into(),
        severity: "CRITICAL".into(),
        confidence,
        location: Some(GeoPoint::new(25.7617, -80.1918)),
        affected_area: None,
        impact_radius_km: Some(50.0),
        event_start_time: 0,
        event_end_time: None,
    }
}

fn broadcaster(tokens: &[(&str, &str)]) -> Arc<RealtimeBroadcaster> {
    let mut authorizer = StaticTokenAuthorizer::new();
    for (token, tenant) in tokens {
        authorizer = authorizer.with_token(token, tenant);
    }
    Arc::new(RealtimeBroadcaster::new(Arc::new(authorizer), 64))
}

async fn wait_for_status(
    pipeline: &AlertPipeline,
    alert_id: u64,
    expected: DeliveryStatus,
) -> bool {
    for _ in 0..200 {
        if let Some(alert) = pipeline.alerts().get(alert_id) {
            if alert.status == expected {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ── Scenario 1: Hurricane near a monitored facility ──────────────────────

#[tokio::test]
async fn test_hurricane_alert_end_to_end() {
    let rt = broadcaster(&[("tok-acme", "acme")]);
    let email = Arc::new(RecordingEmail::default());
    let pipeline = PipelineBuilder::new(VigilConfig::default())
        .with_broadcaster(rt.clone())
        .with_sms(Arc::new(FailingSms))
        .with_email(email.clone())
        .build();
    let mut p = profile(1, "acme", miami_fence());
    p.channels.sms = true;
    pipeline.profiles().upsert(p);

    let mut conn = rt.connect("tok-acme").unwrap();

    let (_, created) = pipeline.process_event(hurricane(0.9)).unwrap();
    assert_eq!(created.len(), 1);
    let alert_id = created[0];

    // CRITICAL maps to IMMEDIATE: the subscriber gets the push.
    let pushed = tokio::time::timeout(Duration::from_secs(2), conn.rx.recv())
        .await
        .expect("no realtime push")
        .expect("channel closed");
    match pushed {
        RealtimeMessage::Alert { summary, .. } => {
            assert_eq!(summary.alert_id, alert_id);
            assert_eq!(summary.severity, Severity::Critical);
        }
        other => panic!("unexpected message: {:?}", other),
    }

    // SMS fails, realtime and email succeed: partial failure is still SENT.
    assert!(wait_for_status(&pipeline, alert_id, DeliveryStatus::Sent).await);
    let alert = pipeline.alerts().get(alert_id).unwrap();
    assert!(alert.channels_delivered.contains(&DeliveryChannel::Realtime));
    assert!(alert.channels_delivered.contains(&DeliveryChannel::Email));
    assert!(!alert.channels_delivered.contains(&DeliveryChannel::Sms));
    assert_eq!(email.sent.lock().unwrap().len(), 1);
}

// ── Scenario 2: Confidence gate ──────────────────────────────────────────

#[tokio::test]
async fn test_confidence_below_threshold_creates_no_alert() {
    let pipeline = PipelineBuilder::new(VigilConfig::default()).build();
    let mut p = profile(1, "acme", miami_fence());
    p.min_confidence = 0.95;
    pipeline.profiles().upsert(p);

    let (_, created) = pipeline.process_event(hurricane(0.9)).unwrap();
    assert!(created.is_empty());
    assert_eq!(pipeline.report().alerts_created, 0);
}

#[tokio::test]
async fn test_category_filter_excludes_event() {
    let pipeline = PipelineBuilder::new(VigilConfig::default()).build();
    let mut p = profile(1, "acme", miami_fence());
    p.categories = vec![ThreatCategory::Cyber];
    pipeline.profiles().upsert(p);

    let (_, created) = pipeline.process_event(hurricane(0.9)).unwrap();
    assert!(created.is_empty());
}

// ── Scenario 3: Tenant isolation ─────────────────────────────────────────

#[tokio::test]
async fn test_alert_pushed_only_to_affected_tenant() {
    let rt = broadcaster(&[("tok-acme", "acme"), ("tok-globex", "globex")]);
    let pipeline = PipelineBuilder::new(VigilConfig::default())
        .with_broadcaster(rt.clone())
        .build();
    pipeline.profiles().upsert(profile(1, "acme", miami_fence()));
    pipeline.profiles().upsert(profile(2, "globex", la_fence()));

    let mut acme = rt.connect("tok-acme").unwrap();
    let mut globex = rt.connect("tok-globex").unwrap();

    let (_, created) = pipeline.process_event(hurricane(0.9)).unwrap();
    assert_eq!(created.len(), 1, "only the Miami profile should match");

    assert!(
        tokio::time::timeout(Duration::from_secs(2), acme.rx.recv())
            .await
            .is_ok(),
        "affected tenant missed the push"
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(200), globex.rx.recv())
            .await
            .is_err(),
        "unaffected tenant received a push"
    );
}

// ── Scenario 4: Ticketing for high severity ──────────────────────────────

#[tokio::test]
async fn test_ticket_created_for_critical_alert() {
    let email = Arc::new(RecordingEmail::default());
    let pipeline = PipelineBuilder::new(VigilConfig::default())
        .with_email(email)
        .with_ticketing(Arc::new(FixedTicketing(4242)))
        .build();
    let mut p = profile(1, "acme", miami_fence());
    p.ticketing_enabled = true;
    pipeline.profiles().upsert(p);

    let (_, created) = pipeline.process_event(hurricane(0.9)).unwrap();
    let alert_id = created[0];

    assert!(wait_for_status(&pipeline, alert_id, DeliveryStatus::Sent).await);
    let alert = pipeline.alerts().get(alert_id).unwrap();
    assert_eq!(alert.ticket_id, Some(4242));
    assert!(alert.channels_delivered.contains(&DeliveryChannel::Ticket));
}

// ── Scenario 5: Operator feedback loop ───────────────────────────────────

#[tokio::test]
async fn test_feedback_adjusts_learning_profile() {
    let pipeline = PipelineBuilder::new(VigilConfig::default()).build();
    pipeline.profiles().upsert(profile(1, "acme", miami_fence()));

    let (_, created) = pipeline.process_event(hurricane(0.9)).unwrap();
    let alert_id = created[0];

    pipeline
        .feedback()
        .record_response(alert_id, "FALSE_POSITIVE", Some("test exercise".into()))
        .unwrap();

    let learned = pipeline.feedback().profile("acme");
    assert_eq!(learned.total_alerts, 1);
    assert_eq!(learned.false_positive_count, 1);
    assert_eq!(learned.false_positive_rate(), 1.0);
    assert!(learned.sensitivity_for(ThreatCategory::Weather) < 1.0);
}

// ── Scenario 6: Escalation broadcast ─────────────────────────────────────

#[tokio::test]
async fn test_escalation_stage_reaches_subscriber() {
    let rt = broadcaster(&[("tok-acme", "acme")]);
    let pipeline = PipelineBuilder::new(VigilConfig::default())
        .with_broadcaster(rt.clone())
        .build();
    pipeline.profiles().upsert(profile(1, "acme", miami_fence()));

    let (event, created) = pipeline.process_event(hurricane(0.9)).unwrap();
    assert_eq!(created.len(), 1);

    // Connect after the alert so only the escalation update arrives.
    let mut conn = rt.connect("tok-acme").unwrap();
    pipeline.escalation().record_stage(
        event.id,
        vigil_core::types::EscalationStage::Imminent,
        0.95,
        Severity::Critical,
        "nws-atlantic",
        "landfall expected within 12 hours",
        vec![],
    );

    let pushed = tokio::time::timeout(Duration::from_secs(2), conn.rx.recv())
        .await
        .expect("no escalation push")
        .expect("channel closed");
    match pushed {
        RealtimeMessage::AlertUpdate { alert_id, update_type, data, .. } => {
            assert_eq!(alert_id, created[0]);
            assert_eq!(update_type, UpdateType::Escalation);
            assert_eq!(data.stage, Some(vigil_core::types::EscalationStage::Imminent));
        }
        other => panic!("unexpected message: {:?}", other),
    }
}
