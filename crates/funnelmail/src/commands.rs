//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use funnelmail_core::{
    BatchSummary, Cadence, Config, DuplicateGuard, JsonRunLedger, MarkerDirectory, RunLedger,
    SentRecord, SentRecordRepository, Sequencer, SequencerOptions, SubscribeOutcome, Subscriber,
    SubscriberRepository, TemplateSet, TransportKind, is_weekend,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{RunArgs, SendArgs};

/// Service name reported by the health check.
const SERVICE_NAME: &str = "funnelmail";

/// Opens the subscriber database, creating its directory if needed.
async fn open_subscribers(config: &Config) -> Result<SubscriberRepository> {
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let path = path_str(&config.database_path)?;
    SubscriberRepository::new(path)
        .await
        .with_context(|| format!("opening database {path}"))
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

/// Forces the log-only transport for dry runs and validates the result.
fn prepare(mut config: Config, dry_run: bool) -> Result<Config> {
    if dry_run {
        config.transport.kind = TransportKind::Console;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Opens the stores, loads templates and wires up a sequencer.
async fn build_sequencer(
    config: &Config,
    dry_run: bool,
    stop: watch::Receiver<bool>,
) -> Result<Sequencer> {
    let subscribers = open_subscribers(config).await?;
    let shared = SentRecordRepository::from_pool(subscribers.pool()).await?;
    let local = MarkerDirectory::new(&config.sent_dir);
    let templates = TemplateSet::load_dir(&config.templates_dir)
        .await
        .context("loading templates")?;
    let mailer =
        funnelmail_transport::build_mailer(&config.transport).context("building mailer")?;

    let options = SequencerOptions {
        from: config.sender().to_string(),
        send_time: config.send_time(),
        max_attempts: config.retry.max_attempts,
        retry_delay: Duration::from_secs(config.retry.delay_secs),
        dry_run,
    };

    Ok(Sequencer::new(
        Arc::new(subscribers),
        Arc::new(templates),
        mailer,
        DuplicateGuard::new(Arc::new(local), Arc::new(shared)),
        options,
    )
    .with_stop_signal(stop))
}

/// Spawns a task that raises the stop signal on Ctrl-C.
fn stop_on_interrupt() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current recipient");
            let _ = stop_tx.send(true);
        }
    });
    stop_rx
}

fn print_summary(summary: &BatchSummary) -> Result<()> {
    for failure in &summary.failures {
        warn!(email = %failure.email, detail = %failure.detail, "Delivery failed");
    }
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

fn cadence(config: &Config, args: &RunArgs) -> Option<Cadence> {
    args.cadence.map(|c| c.to_cadence(config.weekly_weekday))
}

/// Decides whether a run should start at `now`.
///
/// `--force` skips both the weekend and the cadence checks.
async fn should_start(
    config: &Config,
    args: &RunArgs,
    ledger: &dyn RunLedger,
    now: DateTime<Utc>,
) -> Result<bool> {
    if args.force {
        return Ok(true);
    }
    if config.weekdays_only && is_weekend(now) {
        info!(%now, "Weekend detected, skipping sequence run");
        return Ok(false);
    }
    match cadence(config, args) {
        Some(cadence) => Ok(ledger.should_run(cadence, now).await?),
        None => Ok(true),
    }
}

/// Records the run for its cadence. Dry runs and interrupted batches leave
/// the ledger alone so the real, complete run still happens.
///
/// Returns true if the ledger was updated.
async fn finish_run(
    config: &Config,
    args: &RunArgs,
    ledger: &dyn RunLedger,
    summary: &BatchSummary,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(cadence) = cadence(config, args) else {
        return Ok(false);
    };
    if args.dry_run || summary.aborted {
        info!(%cadence, dry_run = args.dry_run, aborted = summary.aborted, "Run not recorded");
        return Ok(false);
    }
    ledger.mark_run(cadence, now).await?;
    Ok(true)
}

/// Runs one batch at `now`. Returns `None` if the run was skipped.
async fn execute_run(
    config: Config,
    args: &RunArgs,
    now: DateTime<Utc>,
    stop: watch::Receiver<bool>,
) -> Result<Option<BatchSummary>> {
    let config = prepare(config, args.dry_run)?;
    let ledger = JsonRunLedger::new(&config.ledger_path);

    if !should_start(&config, args, &ledger, now).await? {
        return Ok(None);
    }

    let sequencer = build_sequencer(&config, args.dry_run, stop).await?;
    let summary = sequencer.run_batch(now).await.context("running batch")?;
    finish_run(&config, args, &ledger, &summary, now).await?;
    Ok(Some(summary))
}

/// Runs one batch.
pub async fn run(config: Config, args: &RunArgs) -> Result<()> {
    if let Some(summary) = execute_run(config, args, Utc::now(), stop_on_interrupt()).await? {
        print_summary(&summary)?;
    }
    Ok(())
}

/// Collects recipients from `--to` and `--to-file`.
async fn recipients(args: &SendArgs) -> Result<Vec<String>> {
    let mut recipients = args.to.clone();
    if let Some(path) = &args.to_file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading recipients from {}", path.display()))?;
        recipients.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if recipients.is_empty() {
        anyhow::bail!("no recipients given; use --to or --to-file");
    }
    Ok(recipients)
}

async fn execute_send(
    config: Config,
    args: &SendArgs,
    now: DateTime<Utc>,
    stop: watch::Receiver<bool>,
) -> Result<BatchSummary> {
    let config = prepare(config, args.dry_run)?;
    let recipients = recipients(args).await?;
    let sequencer = build_sequencer(&config, args.dry_run, stop).await?;
    sequencer
        .send_named(&args.template, &recipients, now)
        .await
        .with_context(|| format!("sending template {}", args.template))
}

/// Sends a named template to a list of recipients.
pub async fn send(config: Config, args: &SendArgs) -> Result<()> {
    let summary = execute_send(config, args, Utc::now(), stop_on_interrupt()).await?;
    print_summary(&summary)
}

/// Adds a subscriber.
pub async fn subscribe(config: &Config, email: &str, name: &str) -> Result<()> {
    let repo = open_subscribers(config).await?;
    match repo.subscribe(name, email, Utc::now()).await? {
        SubscribeOutcome::Created => println!("subscribed {email}"),
        SubscribeOutcome::AlreadyExists => println!("{email} is already subscribed"),
    }
    Ok(())
}

/// Marks a subscriber as unsubscribed.
pub async fn unsubscribe(config: &Config, email: &str) -> Result<()> {
    let repo = open_subscribers(config).await?;
    repo.unsubscribe(email).await?;
    println!("unsubscribed {email}");
    Ok(())
}

/// One subscriber with everything sent to them.
#[derive(Debug, Serialize)]
struct Listing {
    #[serde(flatten)]
    subscriber: Subscriber,
    sent: Vec<SentRecord>,
}

async fn listings(config: &Config) -> Result<Vec<Listing>> {
    let repo = open_subscribers(config).await?;
    let history = SentRecordRepository::from_pool(repo.pool()).await?;

    let mut listings = Vec::new();
    for subscriber in repo.list().await? {
        let sent = history.list_for_recipient(&subscriber.email).await?;
        listings.push(Listing { subscriber, sent });
    }
    Ok(listings)
}

/// Prints every subscriber with its progress and sent history.
pub async fn list(config: &Config) -> Result<()> {
    let listings = listings(config).await?;
    println!("{}", serde_json::to_string_pretty(&listings)?);
    Ok(())
}

/// Prints the health report.
pub fn health() -> Result<()> {
    let report = serde_json::json!({
        "service": SERVICE_NAME,
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
    });
    println!("{report}");
    Ok(())
}
