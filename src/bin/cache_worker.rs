use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use quote_sync::config;
use quote_sync::db;
use quote_sync::intercept::{Fetch, NetworkFetcher, Request, Worker, WorkerConfig};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Drive the interception worker: install, activate, fetch through it"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the current namespaces and pre-fetch the asset manifest
    Install,
    /// Purge namespaces of other versions and start intercepting
    Activate,
    /// Fetch one URL through the worker and print the response
    Fetch {
        url: String,
        /// Send it as a page navigation (Accept: text/html)
        #[arg(long)]
        html: bool,
    },
    /// List cache namespaces with their entry counts
    Namespaces,
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

    if let Command::Namespaces = args.command {
        for name in db::cache::list_namespaces(&pool).await? {
            let entries = db::cache::count_entries(&pool, &name).await?;
            println!("{:<32} {}", name, entries);
        }
        return Ok(());
    }

    let network: Arc<dyn Fetch> = Arc::new(NetworkFetcher::new(Duration::from_secs(
        cfg.remote.timeout_secs,
    ))?);
    let (worker, task) = Worker::spawn(pool, network, WorkerConfig::from_config(&cfg)?).await?;
    info!(phase = worker.phase().await?.as_str(), "worker ready");

    let result = match args.command {
        Command::Install => worker.install().await.map(|report| {
            println!(
                "static={} external={} external_failed={} activated={}",
                report.static_cached,
                report.external_cached,
                report.external_failed,
                report.activated
            );
        }),
        Command::Activate => worker.activate().await.map(|purged| {
            for name in &purged {
                println!("purged {}", name);
            }
            println!("active ({} purged)", purged.len());
        }),
        Command::Fetch { url, html } => {
            let url = Url::parse(&url).with_context(|| format!("invalid url {}", url))?;
            let request = if html {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            match worker.fetch(request).await {
                Ok(res) => {
                    println!(
                        "{} {:?} {}",
                        res.status,
                        res.source,
                        res.content_type.as_deref().unwrap_or("-")
                    );
                    println!("{}", res.text());
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
        Command::Namespaces => Ok(()),
    };

    worker.drain().await.ok();
    worker.shutdown().await;
    task.await.ok();
    result
}
