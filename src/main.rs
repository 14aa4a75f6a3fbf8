use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use quote_sync::config;
use quote_sync::connectivity::Connectivity;
use quote_sync::db;
use quote_sync::intercept::{Fetch, NetworkFetcher, Phase, Worker, WorkerConfig};
use quote_sync::model::{QuotePatch, QuotePayload, QuoteStatus, QueueKind, RecordId};
use quote_sync::remote::HttpRemote;
use quote_sync::{SyncEngine, SyncSummary};

#[derive(Debug, Parser)]
#[command(author, version, about = "Offline-first quotation client")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Start disconnected: mutations are queued, nothing is sent
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the visible quotes, queued ones included
    List,
    /// Show connectivity, queue counts and every queued entry
    Status,
    /// Queue a new quote
    Create(CreateArgs),
    /// Queue an edit of an existing quote
    Edit {
        id: String,
        #[command(flatten)]
        fields: EditArgs,
    },
    /// Queue a deletion
    Delete { id: String },
    /// Drop a pending edit
    CancelEdit { id: i64 },
    /// Drop a pending deletion
    CancelDelete { id: i64 },
    /// Re-arm a failed entry and replay its queue
    Retry {
        #[arg(value_enum)]
        queue: QueueArg,
        id: String,
    },
    /// Replay all queues against the remote
    Sync,
    /// Reload the quote list from the remote
    Refresh,
    /// Keep checking the remote and reconcile whenever it becomes reachable
    Watch {
        /// Seconds between reachability checks
        #[arg(long, default_value_t = 15)]
        interval: u64,
    },
}

#[derive(Debug, ClapArgs)]
struct CreateArgs {
    #[arg(long)]
    product: String,
    #[arg(long)]
    quantity: i64,
    #[arg(long, default_value = "")]
    packaging: String,
    #[arg(long, default_value_t = 0.0)]
    price: f64,
    #[arg(long, default_value = "")]
    notes: String,
    #[arg(long, value_parser = parse_status)]
    status: Option<QuoteStatus>,
}

#[derive(Debug, ClapArgs)]
struct EditArgs {
    #[arg(long)]
    product: Option<String>,
    #[arg(long)]
    quantity: Option<i64>,
    #[arg(long)]
    packaging: Option<String>,
    #[arg(long)]
    price: Option<f64>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long, value_parser = parse_status)]
    status: Option<QuoteStatus>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QueueArg {
    Create,
    Update,
    Delete,
}

impl From<QueueArg> for QueueKind {
    fn from(q: QueueArg) -> Self {
        match q {
            QueueArg::Create => QueueKind::Create,
            QueueArg::Update => QueueKind::Update,
            QueueArg::Delete => QueueKind::Delete,
        }
    }
}

fn parse_status(s: &str) -> Result<QuoteStatus, String> {
    QuoteStatus::parse_status(s).ok_or_else(|| format!("unknown status '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let network: Arc<dyn Fetch> = Arc::new(NetworkFetcher::new(Duration::from_secs(
        cfg.remote.timeout_secs,
    ))?);
    let (worker, worker_task) =
        Worker::spawn(pool.clone(), network.clone(), WorkerConfig::from_config(&cfg)?).await?;
    if !args.offline && cfg.cache.auto_activate && worker.phase().await? != Phase::Active {
        match worker.install().await {
            Ok(report) => info!(?report, "interception worker installed"),
            Err(err) => warn!(?err, "interception worker install failed; requests go straight to the network"),
        }
    }

    let base_url = Url::parse(&cfg.remote.base_url).context("invalid remote.base_url")?;
    let remote = Arc::new(HttpRemote::new(base_url.clone(), Arc::new(worker.clone())));
    let engine = SyncEngine::open(
        pool,
        remote,
        cfg.sync.clone(),
        Connectivity::from_online(!args.offline),
    )
    .await?;

    let result = match args.command {
        Command::Watch { interval } => {
            info!(interval, "watching connectivity; ctrl-c to stop");
            engine
                .follow_connectivity(
                    network.as_ref(),
                    &base_url,
                    Duration::from_secs(interval.max(1)),
                    async {
                        if let Err(err) = tokio::signal::ctrl_c().await {
                            warn!(?err, "failed to listen for ctrl-c");
                        }
                    },
                )
                .await;
            Ok(())
        }
        command => run(&engine, command).await,
    };

    worker.drain().await.ok();
    worker.shutdown().await;
    if let Err(err) = worker_task.await {
        warn!(?err, "interception worker ended abnormally");
    }
    result
}

async fn run(engine: &SyncEngine, command: Command) -> Result<()> {
    match command {
        Command::List => print_quotes(engine).await,
        Command::Status => print_status(engine).await,
        Command::Create(c) => {
            if c.product.trim().is_empty() {
                bail!("product must not be empty");
            }
            if c.quantity <= 0 {
                bail!("quantity must be positive");
            }
            let mut payload = QuotePayload::new(c.product, c.quantity);
            payload.desired_packaging = c.packaging;
            payload.estimated_price = c.price;
            payload.notes = c.notes;
            payload.status = c.status.unwrap_or_default();
            let temp_id = engine.enqueue_create(payload).await?;
            println!("queued {}", temp_id);
            sync_if_online(engine).await
        }
        Command::Edit { id, fields } => {
            let patch = QuotePatch {
                product: fields.product,
                quantity: fields.quantity,
                desired_packaging: fields.packaging,
                estimated_price: fields.price,
                notes: fields.notes,
                status: fields.status,
            };
            if patch.is_empty() {
                bail!("nothing to edit; pass at least one field");
            }
            let outcome = engine.enqueue_update(&RecordId::parse(&id), patch).await?;
            println!("{:?}", outcome);
            sync_if_online(engine).await
        }
        Command::Delete { id } => {
            let outcome = engine.enqueue_delete(&RecordId::parse(&id)).await?;
            println!("{:?}", outcome);
            sync_if_online(engine).await
        }
        Command::CancelEdit { id } => engine.cancel_pending_update(id).await,
        Command::CancelDelete { id } => engine.cancel_pending_delete(id).await,
        Command::Retry { queue, id } => {
            match engine.retry(queue.into(), &RecordId::parse(&id)).await? {
                Some(report) => println!(
                    "{}: {} succeeded, {} failed, {} skipped",
                    report.kind.as_str(),
                    report.succeeded,
                    report.failed,
                    report.skipped
                ),
                None => println!("retry armed; offline"),
            }
            Ok(())
        }
        Command::Sync => {
            let summary = engine.trigger_sync().await?;
            print_summary(&summary);
            Ok(())
        }
        Command::Refresh => {
            match engine.refresh().await? {
                Some(n) => println!("refreshed {} quotes", n),
                None => println!("offline; nothing refreshed"),
            }
            Ok(())
        }
        Command::Watch { .. } => bail!("watch is handled before dispatch"),
    }
}

async fn sync_if_online(engine: &SyncEngine) -> Result<()> {
    if engine.is_online() {
        let summary = engine.trigger_sync().await?;
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &SyncSummary) {
    for r in &summary.reports {
        println!(
            "{:<6} succeeded={} failed={} skipped={}",
            r.kind.as_str(),
            r.succeeded,
            r.failed,
            r.skipped
        );
    }
    if summary.refreshed {
        println!("snapshot refreshed");
    }
}

async fn print_quotes(engine: &SyncEngine) -> Result<()> {
    for q in engine.snapshot().await {
        let mut flags = Vec::new();
        if q.is_queued {
            flags.push("queued");
        }
        if q.pending_edit {
            flags.push("edit");
        }
        if q.pending_delete {
            flags.push("delete");
        }
        println!(
            "{:<28} {:<24} qty={:<6} {:<9} {:>10.2} {}",
            q.id.to_string(),
            q.product,
            q.quantity,
            q.status.as_str(),
            q.estimated_price,
            flags.join(",")
        );
    }
    Ok(())
}

async fn print_status(engine: &SyncEngine) -> Result<()> {
    let state = engine.state().await;
    let counts = state.counts();
    println!(
        "connectivity: {}",
        if engine.is_online() { "online" } else { "offline" }
    );
    println!(
        "queued: create={} update={} delete={}",
        counts.create, counts.update, counts.delete
    );
    match state.last_refresh() {
        Some(at) => println!("last refresh: {}", at.to_rfc3339()),
        None => println!("last refresh: never"),
    }
    for c in state.creates() {
        println!(
            "  create {} {} retries={}",
            c.temp_id,
            c.status.as_str(),
            c.retries
        );
    }
    for u in state.updates() {
        println!("  update {} {} retries={}", u.target, u.status.as_str(), u.retries);
    }
    for d in state.deletes() {
        println!("  delete {} {} retries={}", d.target, d.status.as_str(), d.retries);
    }
    Ok(())
}
