//! Outbound adapters: JSONL audit log and webhook-backed transports.
//!
//! The webhook transports POST JSON to an operator-run relay that does the
//! actual vendor integration (SMS gateway, mail server, ticketing system).
//! They use blocking HTTP because the router runs each send on a blocking
//! task under its own timeout.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vigil_core::types::Severity;
use vigil_pipeline::delivery::{EmailTransport, SmsTransport, TicketTransport};
use vigil_pipeline::AlertPipeline;

// ── JSONL audit log ──────────────────────────────────────────────────────────

/// Appends every created alert to a JSONL file, one object per line.
/// Polls the alert store on an interval; alerts are never deleted, so the
/// snapshot only grows at the tail and a plain high-water mark suffices.
pub struct AlertAuditLog {
    pipeline: Arc<AlertPipeline>,
    path: PathBuf,
    poll_interval_secs: u64,
}

impl AlertAuditLog {
    pub fn new(pipeline: Arc<AlertPipeline>, path: &str) -> Self {
        Self {
            pipeline,
            path: PathBuf::from(path),
            poll_interval_secs: 5,
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Some(parent) = self.path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let mut ticker =
                tokio::time::interval(Duration::from_secs(self.poll_interval_secs));
            let mut seen: u64 = 0;

            loop {
                ticker.tick().await;
                let alerts = self.pipeline.alerts().all();
                let new: Vec<_> = alerts.iter().filter(|a| a.alert_id > seen).collect();
                if new.is_empty() {
                    continue;
                }
                seen = alerts.last().map(|a| a.alert_id).unwrap_or(seen);

                use std::io::Write;
                match std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                {
                    Ok(mut file) => {
                        for alert in &new {
                            if let Ok(line) = serde_json::to_string(alert) {
                                let _ = writeln!(file, "{}", line);
                            }
                        }
                        debug!(new = new.len(), path = %self.path.display(), "Audit log appended");
                    }
                    Err(e) => warn!(error = %e, path = %self.path.display(), "Audit log open failed"),
                }
            }
        })
    }
}

// ── Webhook transports ───────────────────────────────────────────────────────

fn webhook_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("building webhook HTTP client")
}

fn post_json<T: Serialize>(
    client: &reqwest::blocking::Client,
    url: &str,
    payload: &T,
) -> Result<reqwest::blocking::Response, String> {
    let response = client
        .post(url)
        .json(payload)
        .send()
        .map_err(|e| format!("webhook request failed: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("webhook returned {}", response.status()));
    }
    Ok(response)
}

#[derive(Serialize)]
struct SmsPayload<'a> {
    numbers: &'a [String],
    message: &'a str,
}

/// SMS relay: POSTs `{numbers, message}` to `<base>/sms`.
pub struct WebhookSmsTransport {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookSmsTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: webhook_client(timeout)?,
            url: format!("{}/sms", base_url.trim_end_matches('/')),
        })
    }
}

impl SmsTransport for WebhookSmsTransport {
    fn send(&self, numbers: &[String], message: &str) -> Result<(), String> {
        post_json(&self.client, &self.url, &SmsPayload { numbers, message })?;
        debug!(recipients = numbers.len(), "SMS relayed");
        Ok(())
    }
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Email relay: POSTs `{recipient, subject, body}` to `<base>/email`.
pub struct WebhookEmailTransport {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookEmailTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: webhook_client(timeout)?,
            url: format!("{}/email", base_url.trim_end_matches('/')),
        })
    }
}

impl EmailTransport for WebhookEmailTransport {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), String> {
        post_json(
            &self.client,
            &self.url,
            &EmailPayload { recipient, subject, body },
        )?;
        Ok(())
    }
}

#[derive(Serialize)]
struct TicketPayload<'a> {
    tenant_id: &'a str,
    title: &'a str,
    priority: Severity,
    metadata: &'a HashMap<String, String>,
}

#[derive(serde::Deserialize)]
struct TicketResponse {
    ticket_id: u64,
}

/// Ticketing relay: POSTs to `<base>/ticket` and expects `{"ticket_id": N}`.
pub struct WebhookTicketTransport {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookTicketTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: webhook_client(timeout)?,
            url: format!("{}/ticket", base_url.trim_end_matches('/')),
        })
    }
}

impl TicketTransport for WebhookTicketTransport {
    fn create_ticket(
        &self,
        tenant_id: &str,
        title: &str,
        priority: Severity,
        metadata: &HashMap<String, String>,
    ) -> Result<u64, String> {
        let response = post_json(
            &self.client,
            &self.url,
            &TicketPayload { tenant_id, title, priority, metadata },
        )?;
        let parsed: TicketResponse = response
            .json()
            .map_err(|e| format!("malformed ticket response: {}", e))?;
        info!(tenant = tenant_id, ticket_id = parsed.ticket_id, "Ticket created via relay");
        Ok(parsed.ticket_id)
    }
}
