//! # Realtime Broadcaster — Tenant-scoped push fan-out
//!
//! Maintains per-tenant subscriber groups over long-lived push connections.
//! Tenant isolation is the primary invariant: a message published for tenant
//! A must never reach a subscriber connected under tenant B.
//!
//! Broadcasting is fire-and-forget. Nothing is queued or persisted; a tenant
//! with zero connected subscribers simply misses the push (SMS/email remain
//! the durable fallback). Subscribers whose buffer is full or whose receiver
//! was dropped are removed from the group and never block a publish.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vigil_core::types::{AlertSummary, DeliveryStatus, EscalationStage, IntelligenceAlert, OperatorResponse};
use vigil_core::{VigilError, VigilResult};

// ── Wire messages ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    Acknowledged,
    Response,
    Escalation,
    TicketCreated,
}

/// Structured update payload. `extra` carries forward-compatible fields
/// that this version of the protocol does not model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<EscalationStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<OperatorResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

/// The two message types pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeMessage {
    Alert {
        summary: AlertSummary,
        timestamp: i64,
    },
    AlertUpdate {
        alert_id: u64,
        update_type: UpdateType,
        data: UpdateData,
        timestamp: i64,
    },
}

// ── Authorization ────────────────────────────────────────────────────────────

/// Connection authorization boundary. Maps a caller token to the single
/// tenant group the connection is scoped to for its lifetime.
pub trait ConnectionAuthorizer: Send + Sync {
    fn authorize(&self, token: &str) -> Option<String>;
}

/// Fixed token → tenant table; sufficient for tests and single-node setups.
#[derive(Default)]
pub struct StaticTokenAuthorizer {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, tenant_id: &str) -> Self {
        self.tokens.insert(token.into(), tenant_id.into());
        self
    }
}

impl ConnectionAuthorizer for StaticTokenAuthorizer {
    fn authorize(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

// ── Connections ──────────────────────────────────────────────────────────────

/// An authenticated push connection. Dropping the connection closes the
/// receiver; the broadcaster prunes the dead sender on the next publish.
pub struct RealtimeConnection {
    pub conn_id: u64,
    pub tenant_id: String,
    pub rx: mpsc::Receiver<RealtimeMessage>,
}

struct Subscriber {
    conn_id: u64,
    tx: mpsc::Sender<RealtimeMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcasterReport {
    pub connected: usize,
    pub tenant_groups: usize,
    pub total_broadcasts: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
    pub rejected_connections: u64,
}

// ── Broadcaster ──────────────────────────────────────────────────────────────

pub struct RealtimeBroadcaster {
    authorizer: Arc<dyn ConnectionAuthorizer>,
    groups: RwLock<HashMap<String, Vec<Subscriber>>>,
    subscriber_buffer: usize,
    next_conn_id: AtomicU64,
    total_broadcasts: AtomicU64,
    total_delivered: AtomicU64,
    total_dropped: AtomicU64,
    rejected_connections: AtomicU64,
}

impl RealtimeBroadcaster {
    pub fn new(authorizer: Arc<dyn ConnectionAuthorizer>, subscriber_buffer: usize) -> Self {
        Self {
            authorizer,
            groups: RwLock::new(HashMap::new()),
            subscriber_buffer: subscriber_buffer.max(1),
            next_conn_id: AtomicU64::new(1),
            total_broadcasts: AtomicU64::new(0),
            total_delivered: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────────

    /// Authenticate and join the caller to its tenant group. Unauthenticated
    /// callers are refused with no group membership.
    pub fn connect(&self, token: &str) -> VigilResult<RealtimeConnection> {
        let tenant_id = match self.authorizer.authorize(token) {
            Some(t) => t,
            None => {
                self.rejected_connections.fetch_add(1, Ordering::Relaxed);
                warn!("Realtime connection refused: invalid token");
                return Err(VigilError::Unauthorized);
            }
        };

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        self.groups
            .write()
            .entry(tenant_id.clone())
            .or_default()
            .push(Subscriber { conn_id, tx });

        info!(conn_id, tenant = %tenant_id, "Realtime subscriber connected");
        Ok(RealtimeConnection {
            conn_id,
            tenant_id,
            rx,
        })
    }

    /// Remove a connection's group membership. A removed connection never
    /// receives further broadcasts.
    pub fn disconnect(&self, conn_id: u64) {
        let mut groups = self.groups.write();
        for subs in groups.values_mut() {
            subs.retain(|s| s.conn_id != conn_id);
        }
        groups.retain(|_, subs| !subs.is_empty());
        debug!(conn_id, "Realtime subscriber disconnected");
    }

    // ── Publishing ───────────────────────────────────────────────────────

    /// Push a compact alert summary to the alert's tenant group only.
    /// Returns the number of subscribers that received it.
    pub fn broadcast_alert(&self, alert: &IntelligenceAlert) -> usize {
        let message = RealtimeMessage::Alert {
            summary: AlertSummary::from_alert(alert),
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.publish(&alert.tenant_id, message)
    }

    /// Push an acknowledgement/response/escalation/ticket event, scoped to
    /// one tenant group.
    pub fn broadcast_update(
        &self,
        tenant_id: &str,
        alert_id: u64,
        update_type: UpdateType,
        data: UpdateData,
    ) -> usize {
        let message = RealtimeMessage::AlertUpdate {
            alert_id,
            update_type,
            data,
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.publish(tenant_id, message)
    }

    fn publish(&self, tenant_id: &str, message: RealtimeMessage) -> usize {
        self.total_broadcasts.fetch_add(1, Ordering::Relaxed);
        let mut groups = self.groups.write();
        let subs = match groups.get_mut(tenant_id) {
            Some(s) => s,
            None => {
                debug!(tenant = %tenant_id, "No realtime subscribers for tenant");
                return 0;
            }
        };

        let mut delivered = 0usize;
        subs.retain(|sub| match sub.tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(conn_id = sub.conn_id, tenant = %tenant_id, "Subscriber buffer full, dropping connection");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
        if subs.is_empty() {
            groups.remove(tenant_id);
        }

        self.total_delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    // ── Stats ────────────────────────────────────────────────────────────

    pub fn subscriber_count(&self, tenant_id: &str) -> usize {
        self.groups.read().get(tenant_id).map_or(0, |s| s.len())
    }

    pub fn total_broadcasts(&self) -> u64 { self.total_broadcasts.load(Ordering::Relaxed) }
    pub fn total_delivered(&self) -> u64 { self.total_delivered.load(Ordering::Relaxed) }
    pub fn total_dropped(&self) -> u64 { self.total_dropped.load(Ordering::Relaxed) }
    pub fn rejected_connections(&self) -> u64 { self.rejected_connections.load(Ordering::Relaxed) }

    pub fn report(&self) -> BroadcasterReport {
        let groups = self.groups.read();
        BroadcasterReport {
            connected: groups.values().map(|s| s.len()).sum(),
            tenant_groups: groups.len(),
            total_broadcasts: self.total_broadcasts(),
            total_delivered: self.total_delivered(),
            total_dropped: self.total_dropped(),
            rejected_connections: self.rejected_connections(),
        }
    }
}
