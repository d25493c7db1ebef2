//! # Vigil Pipeline — Threat-intelligence alerting
//!
//! Ingests classified hazard events, determines which tenant facilities are
//! geographically and contextually affected, distributes severity-tiered
//! alerts across delivery channels, tracks escalation and delivery state,
//! and adapts per-tenant sensitivity from operator feedback.
//!
//! Flow: classified event → `matcher` (fan-out to tenant profiles) →
//! `distributor` (one alert per match) → `delivery` (parallel per-channel
//! sends, ticketing) → realtime push. Operator response → `feedback` →
//! adjusted matching parameters for future events.

pub mod delivery;
pub mod dispatch;
pub mod distributor;
pub mod escalation;
pub mod feedback;
pub mod ingest;
pub mod matcher;
pub mod store;

pub use dispatch::{AlertPipeline, PipelineBuilder, WorkerPool};
