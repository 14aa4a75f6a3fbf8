use crate::engine::SyncEngine;
use crate::events::SyncEvent;
use crate::model::{BatchReport, QueueKind};
use crate::remote::QuoteRemote;
use crate::state::{Dispatch, Outcome, Settled};
use anyhow::Result;
use tracing::{debug, info, instrument, warn};

/// Replay every eligible entry of one queue, oldest first, one remote call
/// at a time. Entries queued after the run starts wait for the next run.
#[instrument(skip_all, fields(queue = kind.as_str()))]
pub async fn replay_queue(engine: &SyncEngine, kind: QueueKind) -> Result<BatchReport> {
    let limit = engine.policy().rejection_retry_limit;
    let pending = engine.state.lock().await.dispatches(kind, limit);
    let mut report = BatchReport::empty(kind);

    for dispatch in pending {
        let id = dispatch.record_id();
        if !engine.state.lock().await.begin(&dispatch) {
            debug!(%id, "entry cancelled before replay; skipping");
            continue;
        }
        engine.persist().await?;

        let outcome = apply_remote(engine.remote(), &dispatch).await;
        let settled = engine.state.lock().await.complete(&dispatch, outcome);
        match settled {
            Settled::Confirmed => report.succeeded += 1,
            Settled::Failed => report.failed += 1,
            Settled::Superseded | Settled::Stale => report.skipped += 1,
        }
        match (settled, outcome) {
            (Settled::Confirmed, Outcome::Created(remote_id)) => {
                info!(%id, remote_id, "create confirmed")
            }
            (Settled::Confirmed, _) => info!(%id, "entry confirmed"),
            (Settled::Superseded, _) => info!(%id, "newer edit arrived in flight; kept queued"),
            (Settled::Failed, Outcome::Failed(failure)) => {
                warn!(%id, failure = failure.as_str(), "entry failed; kept queued")
            }
            (Settled::Failed, _) => warn!(%id, "entry failed; kept queued"),
            (Settled::Stale, _) => {
                warn!(%id, ?outcome, "entry cancelled while in flight; remote effect not undone")
            }
        }
    }

    engine.persist().await?;
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        "queue replay finished"
    );
    engine.emit(SyncEvent::BatchCompleted(report));
    Ok(report)
}

async fn apply_remote(remote: &dyn QuoteRemote, dispatch: &Dispatch) -> Outcome {
    let res = match dispatch {
        Dispatch::Create { payload, .. } => remote.create(payload).await.map(Outcome::Created),
        Dispatch::Update {
            target, payload, ..
        } => remote.update(*target, payload).await.map(|_| Outcome::Applied),
        Dispatch::Delete { target } => remote.delete(*target).await.map(|_| Outcome::Applied),
    };
    match res {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(error = %err, queue = dispatch.kind().as_str(), "remote call failed");
            Outcome::Failed(err.kind())
        }
    }
}

/// Run the three queues concurrently; no order is kept across them.
pub async fn sync_all(engine: &SyncEngine) -> Result<Vec<BatchReport>> {
    let (creates, updates, deletes) = tokio::join!(
        replay_queue(engine, QueueKind::Create),
        replay_queue(engine, QueueKind::Update),
        replay_queue(engine, QueueKind::Delete),
    );
    Ok(vec![creates?, updates?, deletes?])
}
