//! The interception worker: a task that owns the caching policy and is
//! reachable only through `WorkerHandle` messages.

use super::fetch::{Fetch, FetchError, Method, Request, Response};
use super::namespace::{NamespaceKind, Namespaces};
use super::strategy::{Classifier, ResourceClass, Strategies};
use crate::config::Config;
use crate::db::{self, Pool, StoreKey};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Current version not installed yet.
    Parsed,
    /// Namespaces populated, waiting to be activated.
    Installed,
    /// Intercepting requests.
    Active,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Parsed => "parsed",
            Phase::Installed => "installed",
            Phase::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub static_cached: usize,
    pub external_cached: usize,
    pub external_failed: usize,
    pub activated: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub origin: Url,
    pub names: Namespaces,
    pub classifier: Classifier,
    pub shell_path: String,
    pub static_assets: Vec<String>,
    pub external_assets: Vec<String>,
    pub auto_activate: bool,
}

impl WorkerConfig {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let origin = Url::parse(&cfg.remote.base_url)
            .with_context(|| format!("invalid remote.base_url {}", cfg.remote.base_url))?;
        Ok(Self {
            origin,
            names: Namespaces::new(cfg.cache.prefix.clone(), cfg.cache.version.clone()),
            classifier: Classifier::from_settings(&cfg.cache),
            shell_path: cfg.cache.shell_path.clone(),
            static_assets: cfg.cache.static_assets.clone(),
            external_assets: cfg.cache.external_assets.clone(),
            auto_activate: cfg.cache.auto_activate,
        })
    }
}

enum Message {
    Fetch {
        request: Request,
        reply: oneshot::Sender<Result<Response, FetchError>>,
    },
    Install {
        reply: oneshot::Sender<Result<InstallReport>>,
    },
    Activate {
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    SkipWaiting,
    Phase {
        reply: oneshot::Sender<Phase>,
    },
    /// Wait for background revalidations started so far.
    Drain {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cheap, cloneable sender side of the worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Message>,
}

impl WorkerHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T, FetchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| FetchError::WorkerGone)?;
        rx.await.map_err(|_| FetchError::WorkerGone)
    }

    /// Populate the current namespaces.
    pub async fn install(&self) -> Result<InstallReport> {
        self.call(|reply| Message::Install { reply }).await?
    }

    /// Activate the current version; returns the namespaces purged.
    pub async fn activate(&self) -> Result<Vec<String>> {
        self.call(|reply| Message::Activate { reply }).await?
    }

    /// Force activation without waiting for a reply.
    pub async fn skip_waiting(&self) -> Result<(), FetchError> {
        self.tx
            .send(Message::SkipWaiting)
            .await
            .map_err(|_| FetchError::WorkerGone)
    }

    pub async fn phase(&self) -> Result<Phase, FetchError> {
        self.call(|reply| Message::Phase { reply }).await
    }

    pub async fn drain(&self) -> Result<(), FetchError> {
        self.call(|reply| Message::Drain { reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown).await;
    }
}

#[async_trait]
impl Fetch for WorkerHandle {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        self.call(|reply| Message::Fetch { request, reply }).await?
    }
}

pub struct Worker {
    pool: Pool,
    config: WorkerConfig,
    strategies: Strategies,
    phase: Phase,
    tasks: JoinSet<()>,
}

impl Worker {
    /// Start the worker task. The phase is recovered from the store: a
    /// version activated by an earlier process stays active.
    pub async fn spawn(
        pool: Pool,
        network: Arc<dyn Fetch>,
        config: WorkerConfig,
    ) -> Result<(WorkerHandle, JoinHandle<()>)> {
        let phase = recover_phase(&pool, &config.names).await?;
        info!(version = config.names.version(), phase = phase.as_str(), "starting interception worker");
        let strategies = Strategies::new(
            pool.clone(),
            network,
            config.names.clone(),
            config.shell_path.clone(),
        );
        let worker = Worker {
            pool,
            config,
            strategies,
            phase,
            tasks: JoinSet::new(),
        };
        let (tx, rx) = mpsc::channel(64);
        let join = tokio::spawn(worker.run(rx));
        Ok((WorkerHandle { tx }, join))
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Message>) {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if !self.handle(msg).await {
                        break;
                    }
                }
                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = done {
                        warn!(?err, "intercepted request task failed");
                    }
                }
            }
        }
        while self.tasks.join_next().await.is_some() {}
        debug!("interception worker stopped");
    }

    /// Returns false once the worker should stop.
    async fn handle(&mut self, msg: Message) -> bool {
        match msg {
            Message::Fetch { request, reply } => self.intercept(request, reply),
            Message::Install { reply } => {
                let res = self.install().await;
                let _ = reply.send(res);
            }
            Message::Activate { reply } => {
                let res = self.activate().await;
                let _ = reply.send(res);
            }
            Message::SkipWaiting => {
                if let Err(err) = self.activate().await {
                    warn!(?err, "skip-waiting activation failed");
                }
            }
            Message::Phase { reply } => {
                let _ = reply.send(self.phase);
            }
            Message::Drain { reply } => {
                while let Some(done) = self.tasks.join_next().await {
                    if let Err(err) = done {
                        warn!(?err, "intercepted request task failed");
                    }
                }
                let _ = reply.send(());
            }
            Message::Shutdown => return false,
        }
        true
    }

    /// Pick a strategy and run it on its own task so slow requests do not
    /// hold up the message loop.
    fn intercept(&mut self, request: Request, reply: oneshot::Sender<Result<Response, FetchError>>) {
        let strategies = self.strategies.clone();
        let class = if request.method != Method::Get || self.phase != Phase::Active {
            None
        } else {
            Some(self.config.classifier.classify(&request))
        };
        debug!(method = %request.method, url = %request.url, ?class, "intercept");

        self.tasks.spawn(async move {
            let (res, revalidation) = match class {
                None => (strategies.network().fetch(request).await, None),
                Some(ResourceClass::Api) => (Ok(strategies.network_first_api(request).await), None),
                Some(ResourceClass::Static) => (Ok(strategies.cache_first(request).await), None),
                Some(ResourceClass::Navigation) => (Ok(strategies.navigation(request).await), None),
                Some(ResourceClass::Other) => strategies.stale_while_revalidate(request).await,
            };
            let _ = reply.send(res);
            if let Some(handle) = revalidation {
                if let Err(err) = handle.await {
                    warn!(?err, "background revalidation task failed");
                }
            }
        });
    }

    /// Open the current namespaces and pre-fetch the manifest. First-party
    /// assets are all-or-nothing; third-party assets are best-effort.
    #[instrument(skip_all, fields(version = self.config.names.version()))]
    async fn install(&mut self) -> Result<InstallReport> {
        for name in self.config.names.current() {
            db::cache::open_namespace(&self.pool, &name).await?;
        }

        let mut manifest = Vec::with_capacity(self.config.static_assets.len());
        for path in &self.config.static_assets {
            let url = self
                .config
                .origin
                .join(path)
                .with_context(|| format!("invalid static asset path {}", path))?;
            manifest.push(Request::get(url));
        }
        let network = self.strategies.network().clone();
        let fetched = join_all(manifest.into_iter().map(|req| {
            let network = network.clone();
            async move {
                let key = req.cache_key();
                let res = network.fetch(req).await;
                (key, res)
            }
        }))
        .await;

        let mut first_party = Vec::with_capacity(fetched.len());
        for (key, res) in fetched {
            match res {
                Ok(res) if res.is_success() => first_party.push((key, res)),
                Ok(res) => bail!("install aborted: {} answered {}", key, res.status),
                Err(err) => return Err(anyhow!(err).context(format!("install aborted: {}", key))),
            }
        }
        for (key, res) in &first_party {
            self.strategies.store(NamespaceKind::Static, key, res).await;
        }

        let mut report = InstallReport {
            static_cached: first_party.len(),
            ..Default::default()
        };
        let external = join_all(self.config.external_assets.iter().map(|raw| {
            let network = network.clone();
            let raw = raw.clone();
            async move {
                let req = Url::parse(&raw).map(Request::get);
                match req {
                    Ok(req) => {
                        let key = req.cache_key();
                        (raw, Some(key), network.fetch(req).await)
                    }
                    Err(err) => (raw, None, Err(FetchError::Transport(err.to_string()))),
                }
            }
        }))
        .await;
        for (raw, key, res) in external {
            match (key, res) {
                (Some(key), Ok(res)) if res.is_success() => {
                    self.strategies.store(NamespaceKind::Dynamic, &key, &res).await;
                    report.external_cached += 1;
                }
                (_, Ok(res)) => {
                    warn!(url = %raw, status = res.status, "could not cache external asset");
                    report.external_failed += 1;
                }
                (_, Err(err)) => {
                    warn!(url = %raw, %err, "could not cache external asset");
                    report.external_failed += 1;
                }
            }
        }

        if self.phase == Phase::Parsed {
            self.phase = Phase::Installed;
        }
        info!(
            static_cached = report.static_cached,
            external_cached = report.external_cached,
            external_failed = report.external_failed,
            "install complete"
        );

        if self.config.auto_activate && self.phase != Phase::Active {
            self.activate().await?;
            report.activated = true;
        }
        Ok(report)
    }

    /// Purge every namespace of this app that belongs to another version,
    /// then start intercepting.
    #[instrument(skip_all, fields(version = self.config.names.version()))]
    async fn activate(&mut self) -> Result<Vec<String>> {
        let mut purged = Vec::new();
        for name in db::cache::list_namespaces(&self.pool).await? {
            if self.config.names.is_stale(&name) {
                db::cache::delete_namespace(&self.pool, &name).await?;
                info!(namespace = %name, "deleted stale namespace");
                purged.push(name);
            }
        }
        db::put_json(
            &self.pool,
            StoreKey::ActiveCacheVersion,
            &self.config.names.version(),
        )
        .await?;
        self.phase = Phase::Active;
        info!(purged = purged.len(), "worker active");
        Ok(purged)
    }
}

async fn recover_phase(pool: &Pool, names: &Namespaces) -> Result<Phase> {
    let active: Option<String> = db::get_json(pool, StoreKey::ActiveCacheVersion).await?;
    if active.as_deref() == Some(names.version()) {
        return Ok(Phase::Active);
    }
    let existing = db::cache::list_namespaces(pool).await?;
    let installed = names.current().iter().all(|n| existing.contains(n));
    Ok(if installed {
        Phase::Installed
    } else {
        Phase::Parsed
    })
}
