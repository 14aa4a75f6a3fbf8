//! `SyncEngine`: the front-end facing surface of the sync core.
//!
//! Owns the queue state, persists it after every mutation, publishes
//! events and runs reconciliation when connectivity allows.

use crate::config::SyncPolicy;
use crate::connectivity::{self, Connectivity, ConnectivityMonitor};
use crate::db::{self, Pool, StoreKey};
use crate::events::SyncEvent;
use crate::intercept::fetch::Fetch;
use crate::model::{
    BatchReport, CreateEntry, DeleteEntry, Quote, QuotePatch, QuotePayload, QueueCounts, QueueKind,
    RecordId, UpdateEntry,
};
use crate::outbox;
use crate::remote::QuoteRemote;
use crate::state::{DeleteOutcome, SyncState, UpdateOutcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, instrument, warn};

/// What one `trigger_sync` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub reports: Vec<BatchReport>,
    pub refreshed: bool,
}

impl SyncSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().map(|r| r.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.reports.iter().map(|r| r.skipped).sum()
    }
}

pub struct SyncEngine {
    pool: Pool,
    remote: Arc<dyn QuoteRemote>,
    policy: SyncPolicy,
    pub(crate) state: Mutex<SyncState>,
    persist_lock: Mutex<()>,
    connectivity: ConnectivityMonitor,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Load persisted state and build the engine. Entries an interrupted
    /// run left `syncing` are reset to `pending` and written back.
    #[instrument(skip_all, fields(initial = %initial))]
    pub async fn open(
        pool: Pool,
        remote: Arc<dyn QuoteRemote>,
        policy: SyncPolicy,
        initial: Connectivity,
    ) -> Result<Self> {
        let (state, reset) = load_state(&pool).await?;
        let (events, _) = broadcast::channel(64);
        let engine = Self {
            pool,
            remote,
            policy,
            state: Mutex::new(state),
            persist_lock: Mutex::new(()),
            connectivity: ConnectivityMonitor::new(initial),
            events,
        };
        if reset > 0 {
            warn!(reset, "reset entries left syncing by a previous run");
            engine.persist().await?;
        }
        Ok(engine)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn watch_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.current().is_online()
    }

    pub async fn snapshot(&self) -> Vec<Quote> {
        self.state.lock().await.quotes().to_vec()
    }

    /// Copy of the whole state, queues included.
    pub async fn state(&self) -> SyncState {
        self.state.lock().await.clone()
    }

    pub async fn queue_counts(&self) -> QueueCounts {
        self.state.lock().await.counts()
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_refresh()
    }

    pub(crate) fn remote(&self) -> &dyn QuoteRemote {
        self.remote.as_ref()
    }

    pub(crate) fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Write a fresh clone of the state. The persist lock keeps concurrent
    /// queue runs from writing an older clone over a newer one.
    #[instrument(skip_all)]
    pub(crate) async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.state.lock().await.clone();
        save_state(&self.pool, &snapshot).await
    }

    async fn after_mutation(&self) -> Result<()> {
        self.persist().await?;
        let counts = self.queue_counts().await;
        self.emit(SyncEvent::QueueCountsChanged(counts));
        Ok(())
    }

    pub async fn enqueue_create(&self, payload: QuotePayload) -> Result<String> {
        let temp_id = self.state.lock().await.enqueue_create(payload, Utc::now());
        info!(temp_id = %temp_id, "queued create");
        self.after_mutation().await?;
        Ok(temp_id)
    }

    pub async fn enqueue_update(&self, id: &RecordId, patch: QuotePatch) -> Result<UpdateOutcome> {
        let outcome = self
            .state
            .lock()
            .await
            .enqueue_update(id, &patch, Utc::now())?;
        info!(id = %id, ?outcome, "queued update");
        self.after_mutation().await?;
        Ok(outcome)
    }

    pub async fn enqueue_delete(&self, id: &RecordId) -> Result<DeleteOutcome> {
        let outcome = self.state.lock().await.enqueue_delete(id, Utc::now())?;
        info!(id = %id, ?outcome, "queued delete");
        if outcome != DeleteOutcome::AlreadyQueued {
            self.after_mutation().await?;
        }
        Ok(outcome)
    }

    pub async fn cancel_pending_update(&self, id: i64) -> Result<()> {
        self.state.lock().await.cancel_update(id)?;
        info!(id, "cancelled pending update");
        self.after_mutation().await
    }

    pub async fn cancel_pending_delete(&self, id: i64) -> Result<()> {
        self.state.lock().await.cancel_delete(id)?;
        info!(id, "cancelled pending delete");
        self.after_mutation().await
    }

    pub async fn remove_queued_create(&self, temp_id: &str) -> Result<()> {
        self.state.lock().await.remove_queued_create(temp_id)?;
        info!(temp_id, "removed queued create");
        self.after_mutation().await
    }

    pub async fn cancel(&self, kind: QueueKind, id: &RecordId) -> Result<()> {
        self.state.lock().await.cancel(kind, id)?;
        info!(queue = kind.as_str(), id = %id, "cancelled entry");
        self.after_mutation().await
    }

    /// Re-arm one entry and, when online, replay its queue right away.
    pub async fn retry(&self, kind: QueueKind, id: &RecordId) -> Result<Option<BatchReport>> {
        self.state.lock().await.retry(kind, id)?;
        self.persist().await?;
        if !self.is_online() {
            info!(queue = kind.as_str(), id = %id, "retry armed; offline");
            return Ok(None);
        }
        let report = outbox::replay_queue(self, kind).await?;
        self.emit(SyncEvent::QueueCountsChanged(self.queue_counts().await));
        Ok(Some(report))
    }

    /// Reconcile all three queues. Offline, or with nothing queued, no
    /// remote call is made.
    #[instrument(skip_all)]
    pub async fn trigger_sync(&self) -> Result<SyncSummary> {
        if !self.is_online() {
            info!("offline; sync deferred");
            return Ok(SyncSummary::default());
        }
        if self.queue_counts().await.total() == 0 {
            return Ok(SyncSummary::default());
        }

        let reports = outbox::sync_all(self).await?;
        self.emit(SyncEvent::QueueCountsChanged(self.queue_counts().await));

        let created = reports
            .iter()
            .any(|r| r.kind == QueueKind::Create && r.succeeded > 0);
        let mut refreshed = false;
        if created && self.policy.refresh_after_sync {
            match self.refresh().await {
                Ok(n) => refreshed = n.is_some(),
                Err(err) => warn!(?err, "refresh after sync failed"),
            }
        }
        Ok(SyncSummary { reports, refreshed })
    }

    /// Pull the full list from the remote authority and merge it under the
    /// queued local state. Returns the number of remote records, or `None`
    /// while offline.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<Option<usize>> {
        if !self.is_online() {
            info!("offline; refresh skipped");
            return Ok(None);
        }
        let remote = self
            .remote
            .list()
            .await
            .context("failed to fetch quotes from remote")?;
        let records = remote.len();
        self.state.lock().await.merge_remote(remote, Utc::now());
        self.persist().await?;
        info!(records, "refreshed from remote");
        self.emit(SyncEvent::Refreshed { records });
        Ok(Some(records))
    }

    /// Apply a platform connectivity signal. Going online reconciles the
    /// queues, or refreshes when nothing is queued; going offline only
    /// publishes the new state.
    #[instrument(skip_all, fields(next = %next))]
    pub async fn set_connectivity(&self, next: Connectivity) -> Result<Option<SyncSummary>> {
        let Some(previous) = self.connectivity.set(next) else {
            return Ok(None);
        };
        info!(%previous, %next, "connectivity changed");
        self.emit(SyncEvent::ConnectivityChanged(next));
        if !next.is_online() {
            return Ok(None);
        }

        if self.queue_counts().await.total() > 0 {
            return self.trigger_sync().await.map(Some);
        }
        let refreshed = match self.refresh().await {
            Ok(n) => n.is_some(),
            Err(err) => {
                warn!(?err, "refresh on reconnect failed");
                false
            }
        };
        Ok(Some(SyncSummary {
            reports: Vec::new(),
            refreshed,
        }))
    }

    /// Check `url` every `every` and feed the result to `set_connectivity`
    /// until `shutdown` resolves. Reconcile errors are logged and the loop
    /// keeps going.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn follow_connectivity(
        &self,
        network: &dyn Fetch,
        url: &Url,
        every: Duration,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            let next = connectivity::reachability(network, url).await;
            match self.set_connectivity(next).await {
                Ok(Some(summary)) => info!(
                    succeeded = summary.succeeded(),
                    failed = summary.failed(),
                    skipped = summary.skipped(),
                    refreshed = summary.refreshed,
                    "reconciled after connectivity change"
                ),
                Ok(None) => {}
                Err(err) => warn!(?err, "reconcile after connectivity change failed"),
            }
        }
        info!("connectivity watch stopped");
    }
}

/// Read the five persisted documents. Missing keys load as empty.
#[instrument(skip_all)]
pub async fn load_state(pool: &Pool) -> Result<(SyncState, usize)> {
    let quotes: Vec<Quote> = db::get_json(pool, StoreKey::Snapshot).await?.unwrap_or_default();
    let creates: Vec<CreateEntry> = db::get_json(pool, StoreKey::CreateQueue)
        .await?
        .unwrap_or_default();
    let updates: Vec<UpdateEntry> = db::get_json(pool, StoreKey::UpdateQueue)
        .await?
        .unwrap_or_default();
    let deletes: Vec<DeleteEntry> = db::get_json(pool, StoreKey::DeleteQueue)
        .await?
        .unwrap_or_default();
    let last_refresh: Option<DateTime<Utc>> =
        db::get_json::<Option<DateTime<Utc>>>(pool, StoreKey::LastRefresh)
            .await?
            .flatten();
    Ok(SyncState::restore(quotes, creates, updates, deletes, last_refresh))
}

/// Overwrite all five documents with `state` in one transaction.
#[instrument(skip_all, fields(records = state.quotes().len()))]
pub async fn save_state(pool: &Pool, state: &SyncState) -> Result<()> {
    let docs = vec![
        (StoreKey::Snapshot, serde_json::to_string(state.quotes())?),
        (StoreKey::CreateQueue, serde_json::to_string(state.creates())?),
        (StoreKey::UpdateQueue, serde_json::to_string(state.updates())?),
        (StoreKey::DeleteQueue, serde_json::to_string(state.deletes())?),
        (StoreKey::LastRefresh, serde_json::to_string(&state.last_refresh())?),
    ];
    db::put_documents(pool, &docs)
        .await
        .context("failed to persist sync state")
}
