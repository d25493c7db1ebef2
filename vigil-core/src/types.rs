//! Shared data model for the Vigil alerting pipeline.
//!
//! Wire-facing enums use the classifier's UPPER_SNAKE form and validate
//! strictly: an unknown category/severity/response is an input error at
//! the boundary, never a panic inside the pipeline.

use crate::error::{VigilError, VigilResult};
use crate::geo::{GeoPoint, GeoPolygon};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ── Classification enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatCategory {
    Political,
    Weather,
    Cyber,
    CivilEmergency,
    Terrorism,
    Crime,
    Infrastructure,
    Health,
    Other,
}

impl FromStr for ThreatCategory {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POLITICAL" => Ok(Self::Political),
            "WEATHER" => Ok(Self::Weather),
            "CYBER" => Ok(Self::Cyber),
            "CIVIL_EMERGENCY" => Ok(Self::CivilEmergency),
            "TERRORISM" => Ok(Self::Terrorism),
            "CRIME" => Ok(Self::Crime),
            "INFRASTRUCTURE" => Ok(Self::Infrastructure),
            "HEALTH" => Ok(Self::Health),
            "OTHER" => Ok(Self::Other),
            other => Err(VigilError::InvalidInput(format!(
                "unknown threat category '{}'",
                other
            ))),
        }
    }
}

/// Ordered ascending so `Critical > High > Medium > Low > Info` holds via
/// the derived ordering wherever thresholds are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Severity {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(VigilError::InvalidInput(format!(
                "unknown severity '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

// ── Delivery enums ───────────────────────────────────────────────────────────

/// Per-tenant delivery-speed tier derived from event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Disabled,
    Digest,
    Standard,
    Rapid,
    Immediate,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "DISABLED",
            Self::Digest => "DIGEST",
            Self::Standard => "STANDARD",
            Self::Rapid => "RAPID",
            Self::Immediate => "IMMEDIATE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryChannel {
    Realtime,
    Sms,
    Email,
    Ticket,
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Realtime => "realtime",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Ticket => "ticket",
        };
        f.write_str(s)
    }
}

/// Operator feedback on an alert. `NoResponse` is the created-state default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorResponse {
    NoResponse,
    Actionable,
    Noted,
    FalsePositive,
    Missed,
    TooSensitive,
}

impl FromStr for OperatorResponse {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIONABLE" => Ok(Self::Actionable),
            "NOTED" => Ok(Self::Noted),
            "FALSE_POSITIVE" => Ok(Self::FalsePositive),
            "MISSED" => Ok(Self::Missed),
            "TOO_SENSITIVE" => Ok(Self::TooSensitive),
            other => Err(VigilError::InvalidInput(format!(
                "unknown response type '{}'",
                other
            ))),
        }
    }
}

// ── Escalation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationStage {
    EarlySignal,
    Chatter,
    OfficialWarning,
    Imminent,
    Active,
    Aftermath,
    Resolved,
}

/// A signal supporting a stage assessment (a feed item, sensor reading, etc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportingSignal {
    pub source: String,
    pub detail: String,
}

/// One append-only history entry in a threat event's assessed lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub event_id: u64,
    pub stage: EscalationStage,
    /// Confidence at this stage, not the event's creation-time confidence.
    pub confidence: f64,
    pub severity: Severity,
    pub trigger_source: String,
    pub trigger_description: String,
    pub supporting_signals: Vec<SupportingSignal>,
    pub recorded_at: i64,
}

// ── Threat events ────────────────────────────────────────────────────────────

/// A classified hazard event. Immutable after ingestion; escalation state
/// lives in the append-only tracker, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub id: u64,
    pub source_id: String,
    pub category: ThreatCategory,
    pub severity: Severity,
    /// Classifier confidence in [0.0, 1.0].
    pub confidence: f64,
    pub location: Option<GeoPoint>,
    pub affected_area: Option<GeoPolygon>,
    pub impact_radius_km: Option<f64>,
    pub starts_at: i64,
    pub ends_at: Option<i64>,
}

impl ThreatEvent {
    /// Active when `now` falls within [starts_at, ends_at), or when the
    /// window is open-ended and has started.
    pub fn is_active(&self, now: i64) -> bool {
        match self.ends_at {
            Some(end) => self.starts_at <= now && now < end,
            None => self.starts_at <= now,
        }
    }
}

/// Raw classifier output at the inbound boundary. Category and severity
/// arrive as strings and are validated into the known enums on ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEventRecord {
    pub source_id: String,
    pub category: String,
    pub severity: String,
    pub confidence: f64,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub affected_area: Option<GeoPolygon>,
    #[serde(default)]
    pub impact_radius_km: Option<f64>,
    pub event_start_time: i64,
    #[serde(default)]
    pub event_end_time: Option<i64>,
}

impl ClassifiedEventRecord {
    /// Structural validation only — classification correctness is the
    /// classifier's problem. Rejects unknown enums, out-of-range
    /// confidence, and inverted time windows.
    pub fn validate(&self) -> VigilResult<(ThreatCategory, Severity)> {
        let category: ThreatCategory = self.category.parse()?;
        let severity: Severity = self.severity.parse()?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(VigilError::InvalidInput(format!(
                "confidence {} outside [0.0, 1.0]",
                self.confidence
            )));
        }
        if let Some(end) = self.event_end_time {
            if end < self.event_start_time {
                return Err(VigilError::InvalidInput(
                    "event_end_time precedes event_start_time".into(),
                ));
            }
        }
        Ok((category, severity))
    }
}

// ── Tenant monitoring profiles ───────────────────────────────────────────────

/// Severity → urgency mapping configured per tenant profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgencyMap {
    pub critical: Urgency,
    pub high: Urgency,
    pub medium: Urgency,
    pub low: Urgency,
    pub info: Urgency,
}

impl UrgencyMap {
    pub fn for_severity(&self, severity: Severity) -> Urgency {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

impl Default for UrgencyMap {
    fn default() -> Self {
        Self {
            critical: Urgency::Immediate,
            high: Urgency::Rapid,
            medium: Urgency::Standard,
            low: Urgency::Digest,
            info: Urgency::Disabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub realtime: bool,
    pub sms: bool,
    pub email: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            realtime: true,
            sms: false,
            email: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub sms_numbers: Vec<String>,
    #[serde(default)]
    pub email_addresses: Vec<String>,
}

/// One monitoring profile per tenant facility group. Read-only to the
/// matching engine; mutated by the external administrative surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMonitoringProfile {
    pub profile_id: u64,
    pub tenant_id: String,
    pub name: String,
    pub geofences: Vec<GeoPolygon>,
    /// Expands every geofence outward for matching.
    pub buffer_km: f64,
    /// Empty allow-list means all categories are in scope.
    #[serde(default)]
    pub categories: Vec<ThreatCategory>,
    pub min_severity: Severity,
    pub min_confidence: f64,
    #[serde(default)]
    pub urgency: UrgencyMap,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub ticketing_enabled: bool,
    #[serde(default)]
    pub contacts: ContactInfo,
    pub active: bool,
}

impl TenantMonitoringProfile {
    pub fn allows_category(&self, category: ThreatCategory) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }
}

// ── Intelligence alerts ──────────────────────────────────────────────────────

/// One alert per (event, profile) match. Never deleted — the audit trail
/// and the learning signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceAlert {
    pub alert_id: u64,
    pub event_id: u64,
    pub profile_id: u64,
    pub tenant_id: String,
    pub severity: Severity,
    pub urgency: Urgency,
    /// Straight-line km from event location to the profile's geofence centroid.
    pub distance_km: f64,
    pub status: DeliveryStatus,
    /// Exactly the channels that succeeded.
    pub channels_delivered: Vec<DeliveryChannel>,
    pub delivery_error: Option<String>,
    pub ticket_id: Option<u64>,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
    pub response: OperatorResponse,
    pub response_note: Option<String>,
    pub responded_at: Option<i64>,
}

/// Compact alert form pushed over realtime connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSummary {
    pub alert_id: u64,
    pub event_id: u64,
    pub tenant_id: String,
    pub severity: Severity,
    pub urgency: Urgency,
    pub distance_km: f64,
    pub created_at: i64,
}

impl AlertSummary {
    pub fn from_alert(alert: &IntelligenceAlert) -> Self {
        Self {
            alert_id: alert.alert_id,
            event_id: alert.event_id,
            tenant_id: alert.tenant_id.clone(),
            severity: alert.severity,
            urgency: alert.urgency,
            distance_km: alert.distance_km,
            created_at: alert.created_at,
        }
    }
}

// ── Tenant learning profiles ─────────────────────────────────────────────────

/// Adaptive per-tenant profile fed by operator feedback. Counters only;
/// rates are derived on read so they can never drift from the counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantLearningProfile {
    pub tenant_id: String,
    pub total_alerts: u64,
    pub actionable_count: u64,
    pub false_positive_count: u64,
    pub missed_count: u64,
    pub response_time_sum_secs: i64,
    pub response_count: u64,
    /// Per-category sensitivity multiplier, default 1.0.
    #[serde(default)]
    pub category_sensitivity: HashMap<ThreatCategory, f64>,
    /// Learned override for the profile buffer radius, when set.
    pub effective_radius_km: Option<f64>,
}

impl TenantLearningProfile {
    pub fn actionable_rate(&self) -> f64 {
        if self.total_alerts == 0 {
            0.0
        } else {
            self.actionable_count as f64 / self.total_alerts as f64
        }
    }

    pub fn false_positive_rate(&self) -> f64 {
        if self.total_alerts == 0 {
            0.0
        } else {
            self.false_positive_count as f64 / self.total_alerts as f64
        }
    }

    pub fn avg_response_secs(&self) -> f64 {
        if self.response_count == 0 {
            0.0
        } else {
            self.response_time_sum_secs as f64 / self.response_count as f64
        }
    }

    pub fn sensitivity_for(&self, category: ThreatCategory) -> f64 {
        self.category_sensitivity.get(&category).copied().unwrap_or(1.0)
    }
}
