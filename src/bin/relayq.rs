//! relayq CLI — operator interface to the queue engine.
//!
//! `sweep` runs the maintenance daemon for both queues; the rest are
//! one-shot operator commands. Worker loops with real executors are
//! embedded by the applications that own the transports, via the
//! library API.

use clap::{Parser, Subcommand, ValueEnum};
use relayq::clock::SystemClock;
use relayq::config::{Config, Tuning};
use relayq::engine::{ShutdownToken, Sweeper, WorkQueue};
use relayq::kind::WorkKind;
use relayq::kinds::{CommandKind, DeliveryKind};
use relayq::model::{ItemId, NewWorkItem, Status};
use relayq::policy::RetryPolicy;
use relayq::store::postgres::{Db, PgHistorySink, PgStore};
use relayq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "relayq", about = "Postgres-backed work-queue engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum QueueName {
    Delivery,
    Commands,
}

#[derive(Subcommand)]
enum Command {
    /// Run the maintenance sweep daemon for both queues
    Sweep {
        /// Optional TOML tuning file with per-queue overrides
        #[arg(long, default_value = "relayq.toml")]
        tuning: PathBuf,
        /// Run a single sweep pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Enqueue a work item
    Enqueue {
        #[arg(value_enum)]
        queue: QueueName,
        /// Owning organization ID
        #[arg(long)]
        owner: uuid::Uuid,
        /// Payload JSON
        payload: String,
        #[arg(long)]
        max_retries: Option<u32>,
        /// Claim priority (lower claims first)
        #[arg(long)]
        priority: Option<i32>,
    },
    /// List work items
    List {
        #[arg(value_enum)]
        queue: QueueName,
        /// Filter by status (pending, processing, failed)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a work item
    Show {
        #[arg(value_enum)]
        queue: QueueName,
        /// Work item ID (full UUID or prefix)
        id: String,
    },
    /// Per-status row counts
    Stats {
        #[arg(value_enum)]
        queue: QueueName,
    },
    /// Reset stuck processing items back to pending
    ReleaseStuck {
        #[arg(value_enum)]
        queue: QueueName,
        #[arg(long, default_value_t = 300)]
        staleness_secs: i64,
    },
    /// Delete failed items past retention
    PurgeFailed {
        #[arg(value_enum)]
        queue: QueueName,
        #[arg(long, default_value_t = 7)]
        retention_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Sweep { tuning, once } => cmd_sweep(tuning, once).await,
        Command::Enqueue {
            queue,
            owner,
            payload,
            max_retries,
            priority,
        } => match queue {
            QueueName::Delivery => {
                cmd_enqueue::<DeliveryKind>(owner, payload, max_retries, priority).await
            }
            QueueName::Commands => {
                cmd_enqueue::<CommandKind>(owner, payload, max_retries, priority).await
            }
        },
        Command::List {
            queue,
            status,
            limit,
        } => match queue {
            QueueName::Delivery => cmd_list::<DeliveryKind>(status, limit).await,
            QueueName::Commands => cmd_list::<CommandKind>(status, limit).await,
        },
        Command::Show { queue, id } => match queue {
            QueueName::Delivery => cmd_show::<DeliveryKind>(id).await,
            QueueName::Commands => cmd_show::<CommandKind>(id).await,
        },
        Command::Stats { queue } => match queue {
            QueueName::Delivery => cmd_stats::<DeliveryKind>().await,
            QueueName::Commands => cmd_stats::<CommandKind>().await,
        },
        Command::ReleaseStuck {
            queue,
            staleness_secs,
        } => match queue {
            QueueName::Delivery => cmd_release_stuck::<DeliveryKind>(staleness_secs).await,
            QueueName::Commands => cmd_release_stuck::<CommandKind>(staleness_secs).await,
        },
        Command::PurgeFailed {
            queue,
            retention_days,
        } => match queue {
            QueueName::Delivery => cmd_purge_failed::<DeliveryKind>(retention_days).await,
            QueueName::Commands => cmd_purge_failed::<CommandKind>(retention_days).await,
        },
    }
}

async fn connect() -> anyhow::Result<Db> {
    let config = Config::from_env()?;
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(db)
}

fn build_queue<K: WorkKind>(db: &Db) -> Arc<WorkQueue<K>> {
    let store = Arc::new(PgStore::<K>::new(db.pool().clone()));
    let history = Arc::new(PgHistorySink::new(db.pool().clone(), K::HISTORY_TABLE));
    Arc::new(WorkQueue::new(
        store,
        history,
        Arc::new(SystemClock),
        RetryPolicy::default(),
    ))
}

async fn cmd_sweep(tuning_path: PathBuf, once: bool) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "relayq".to_string(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let tuning = Tuning::load_optional(&tuning_path)?;
    let delivery_sweep = tuning
        .delivery
        .apply(relayq::engine::WorkerConfig::for_kind::<DeliveryKind>("sweepd"))
        .sweep;
    let commands_sweep = tuning
        .commands
        .apply(relayq::engine::WorkerConfig::for_kind::<CommandKind>("sweepd"))
        .sweep;

    let delivery = build_queue::<DeliveryKind>(&db);
    let commands = build_queue::<CommandKind>(&db);

    if once {
        let report = delivery.sweep(&delivery_sweep).await?;
        println!(
            "delivery: released {} invalidated {} purged {}",
            report.released, report.invalidated, report.purged
        );
        let report = commands.sweep(&commands_sweep).await?;
        println!(
            "commands: released {} invalidated {} purged {}",
            report.released, report.invalidated, report.purged
        );
        return Ok(());
    }

    let shutdown = ShutdownToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        token.cancel();
    });

    let delivery_handle = tokio::spawn(
        Sweeper::new(delivery, delivery_sweep, shutdown.clone()).run(),
    );
    let commands_handle = tokio::spawn(
        Sweeper::new(commands, commands_sweep, shutdown.clone()).run(),
    );

    let _ = delivery_handle.await;
    let _ = commands_handle.await;
    Ok(())
}

async fn cmd_enqueue<K: WorkKind>(
    owner: uuid::Uuid,
    payload: String,
    max_retries: Option<u32>,
    priority: Option<i32>,
) -> anyhow::Result<()> {
    let payload: K::Payload = serde_json::from_str(&payload)?;

    let db = connect().await?;
    let queue = build_queue::<K>(&db);

    let mut new = NewWorkItem::new(owner, payload);
    if let Some(n) = max_retries {
        new = new.max_retries(n);
    }
    if let Some(p) = priority {
        new = new.priority(p);
    }

    let item = queue.enqueue(new).await?;
    println!("Enqueued: {} (status: {})", item.id, item.status);
    Ok(())
}

async fn cmd_list<K: WorkKind>(status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let db = connect().await?;
    let queue = build_queue::<K>(&db);
    let items = queue.list(status_filter, limit).await?;

    if items.is_empty() {
        println!("No work items found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<10}  {:<4}  {:<7}  {:<19}  LAST_ERROR",
        "ID", "STATUS", "PRI", "RETRIES", "CREATED"
    );
    println!("{}", "-".repeat(90));

    for item in &items {
        let short_id = &item.id.to_string()[..8];
        let error = item.last_error.as_deref().unwrap_or("-");
        let error_display = truncate_chars(error, 30);
        println!(
            "{:<8}  {:<10}  {:<4}  {:<7}  {:<19}  {}",
            short_id,
            item.status,
            item.priority,
            format!("{}/{}", item.retry_count, item.max_retries),
            item.created_at.format("%Y-%m-%d %H:%M"),
            error_display
        );
    }

    println!("\n{} item(s)", items.len());
    Ok(())
}

/// Truncate to at most `max` characters. Error messages are arbitrary
/// text, so cutting at a byte offset could land inside a multibyte
/// character and panic the slice.
fn truncate_chars(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(i, _)| &s[..i])
}

async fn cmd_show<K: WorkKind>(id_str: String) -> anyhow::Result<()> {
    let db = connect().await?;
    let queue = build_queue::<K>(&db);

    // Support prefix matching — find the item whose ID starts with the
    // given string
    let id = if id_str.len() < 36 {
        let items = queue.list(None, 100).await?;
        let matches: Vec<_> = items
            .iter()
            .filter(|item| item.id.to_string().starts_with(&id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no work item matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} work items match prefix '{id_str}' — be more specific"),
        }
    } else {
        ItemId(uuid::Uuid::parse_str(&id_str)?)
    };

    let item = queue.get(id).await?;
    println!("ID:          {}", item.id);
    println!("Owner:       {}", item.owner_id);
    println!("Status:      {}", item.status);
    println!("Priority:    {}", item.priority);
    println!("Retries:     {}/{}", item.retry_count, item.max_retries);
    if let Some(at) = item.next_retry_at {
        println!("Next retry:  {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ref assignee) = item.assignee {
        println!("Assignee:    {assignee}");
    }
    if let Some(at) = item.last_heartbeat_at {
        println!("Heartbeat:   {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ref error) = item.last_error {
        println!("Last error:  {error}");
    }
    println!("Created:     {}", item.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated:     {}", item.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Payload:     {}", serde_json::to_string_pretty(&item.payload)?);
    Ok(())
}

async fn cmd_stats<K: WorkKind>() -> anyhow::Result<()> {
    let db = connect().await?;
    let queue = build_queue::<K>(&db);
    let counts = queue.counts().await?;
    println!("pending:     {}", counts.pending);
    println!("processing:  {}", counts.processing);
    println!("failed:      {}", counts.failed);
    Ok(())
}

async fn cmd_release_stuck<K: WorkKind>(staleness_secs: i64) -> anyhow::Result<()> {
    let db = connect().await?;
    let queue = build_queue::<K>(&db);
    let released = queue
        .release_stuck(chrono::Duration::seconds(staleness_secs))
        .await?;
    println!("Released {released} stuck item(s)");
    Ok(())
}

async fn cmd_purge_failed<K: WorkKind>(retention_days: i64) -> anyhow::Result<()> {
    let db = connect().await?;
    let queue = build_queue::<K>(&db);
    let purged = queue.purge_failed(chrono::Duration::days(retention_days)).await?;
    println!("Purged {purged} failed item(s)");
    Ok(())
}
