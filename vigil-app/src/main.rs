mod adapters;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_core::config::VigilConfig;
use vigil_core::types::{ClassifiedEventRecord, TenantMonitoringProfile};
use vigil_pipeline::{PipelineBuilder, WorkerPool};
use vigil_realtime::{RealtimeBroadcaster, StaticTokenAuthorizer};

use adapters::{AlertAuditLog, WebhookEmailTransport, WebhookSmsTransport, WebhookTicketTransport};

#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Vigil — geospatial threat-intelligence alerting")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "vigil.toml")]
    config: String,

    /// Log level (overrides config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Generate a default config file and exit
    #[arg(long)]
    generate_config: bool,

    /// Dry-run: load config, validate, print report, exit
    #[arg(long)]
    dry_run: bool,

    /// JSONL file of classified events to replay through the pipeline
    #[arg(long)]
    events: Option<String>,

    /// JSONL file of tenant monitoring profiles to load at startup
    #[arg(long)]
    profiles: Option<String>,

    /// Alert audit log path (overrides config file)
    #[arg(long)]
    alert_log: Option<String>,

    /// Webhook relay base URL for SMS/email/ticketing (overrides config file)
    #[arg(long)]
    alert_webhook: Option<String>,

    /// Realtime subscriber credential as token=tenant (repeatable)
    #[arg(long = "realtime-token")]
    realtime_tokens: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Generate Config ──────────────────────────────────────────────
    if cli.generate_config {
        let config = VigilConfig::default();
        config.save(&cli.config)?;
        println!("Default configuration written to {}", cli.config);
        return Ok(());
    }

    // ── Load Config ──────────────────────────────────────────────────
    let config = VigilConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: {}, using defaults", e);
        VigilConfig::default()
    });
    let problems = config.validate();
    if !problems.is_empty() {
        bail!("invalid configuration: {}", problems.join("; "));
    }

    let log_level = cli.log_level.as_deref().unwrap_or(&config.general.log_level);

    // ── Tracing ──────────────────────────────────────────────────────
    let level = match log_level {
        "trace" => Level::TRACE, "debug" => Level::DEBUG,
        "warn" => Level::WARN, "error" => Level::ERROR, _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Vigil v{}", env!("CARGO_PKG_VERSION"));

    // ── Realtime ─────────────────────────────────────────────────────
    let mut authorizer = StaticTokenAuthorizer::new();
    for pair in &cli.realtime_tokens {
        let Some((token, tenant)) = pair.split_once('=') else {
            bail!("--realtime-token expects token=tenant, got '{}'", pair);
        };
        authorizer = authorizer.with_token(token, tenant);
    }
    let broadcaster = Arc::new(RealtimeBroadcaster::new(
        Arc::new(authorizer),
        config.realtime.subscriber_buffer,
    ));

    // ── Transports ───────────────────────────────────────────────────
    let webhook_url = cli
        .alert_webhook
        .clone()
        .unwrap_or_else(|| config.delivery.webhook_url.clone());
    let timeout = Duration::from_secs(config.delivery.channel_timeout_secs);

    let mut builder = PipelineBuilder::new(config.clone()).with_broadcaster(broadcaster.clone());
    if webhook_url.is_empty() {
        warn!("No webhook relay configured; SMS/email/ticketing channels disabled");
    } else {
        builder = builder
            .with_sms(Arc::new(WebhookSmsTransport::new(&webhook_url, timeout)?))
            .with_email(Arc::new(WebhookEmailTransport::new(&webhook_url, timeout)?))
            .with_ticketing(Arc::new(WebhookTicketTransport::new(&webhook_url, timeout)?));
        info!(url = %webhook_url, "Webhook relay transports wired");
    }
    let pipeline = builder.build();

    // ── Tenant Profiles ──────────────────────────────────────────────
    if let Some(path) = &cli.profiles {
        let loaded = load_profiles(path, &pipeline)
            .with_context(|| format!("loading profiles from {}", path))?;
        info!(profiles = loaded, path = %path, "Tenant profiles loaded");
    }

    // ── Dry Run ──────────────────────────────────────────────────────
    if cli.dry_run {
        let report = pipeline.report();
        info!(
            profiles = pipeline.profiles().len(),
            workers = config.dispatch.workers,
            queue = config.dispatch.queue_capacity,
            report = %serde_json::to_string(&report).unwrap_or_default(),
            "Dry-run complete. Configuration valid."
        );
        return Ok(());
    }

    // ── Audit Log ────────────────────────────────────────────────────
    let alert_log = cli
        .alert_log
        .clone()
        .unwrap_or_else(|| config.general.alert_log.clone());
    if !alert_log.is_empty() {
        let _audit = AlertAuditLog::new(pipeline.clone(), &alert_log).start();
        info!(path = %alert_log, "Alert audit log started");
    }

    // ── Dispatch ─────────────────────────────────────────────────────
    let pool = WorkerPool::start(
        pipeline.clone(),
        config.dispatch.queue_capacity,
        config.dispatch.workers,
    );

    if let Some(path) = &cli.events {
        // Batch replay: feed the file through the queue, drain, report.
        let submitted = replay_events(path, &pool)
            .with_context(|| format!("replaying events from {}", path))?;
        info!(events = submitted, path = %path, "Event replay submitted");
        pool.shutdown().await;

        let report = pipeline.report();
        info!(report = %serde_json::to_string(&report).unwrap_or_default(), "Replay complete");
        return Ok(());
    }

    info!("Vigil running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down Vigil...");
    pool.shutdown().await;

    let report = pipeline.report();
    info!(
        events_accepted = report.events_accepted,
        alerts_created = report.alerts_created,
        alerts_sent = report.alerts_sent,
        alerts_failed = report.alerts_failed,
        "Shutdown complete"
    );
    Ok(())
}

/// Load monitoring profiles from a JSONL file, one profile per line.
fn load_profiles(path: &str, pipeline: &vigil_pipeline::AlertPipeline) -> Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let mut loaded = 0;
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let profile: TenantMonitoringProfile = serde_json::from_str(line)
            .with_context(|| format!("line {}", line_no + 1))?;
        pipeline.profiles().upsert(profile);
        loaded += 1;
    }
    Ok(loaded)
}

/// Submit classified events from a JSONL file. A malformed line is skipped
/// with a warning; a full queue retries after a short backoff.
fn replay_events(path: &str, pool: &WorkerPool) -> Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let mut submitted = 0;
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ClassifiedEventRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed event record");
                continue;
            }
        };
        let mut attempts = 0;
        loop {
            match pool.submit(record.clone()) {
                Ok(()) => {
                    submitted += 1;
                    break;
                }
                Err(vigil_core::VigilError::QueueFull { .. }) if attempts < 40 => {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(vigil_core::VigilError::QueueFull { .. }) => {
                    warn!(line = line_no + 1, "Dispatch queue still full, dropping record");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(submitted)
}
