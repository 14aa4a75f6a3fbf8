//! Visible quote snapshot plus the three operation queues.
//!
//! `SyncState` is plain data: every mutation goes through its methods and
//! none of them perform I/O. The engine wraps it in a lock, persists it
//! after each change and drives reconciliation through `dispatches`,
//! `begin` and `complete`.

use crate::model::{
    CreateEntry, DeleteEntry, FailureKind, Quote, QuotePatch, QuotePayload,
    QueueCounts, QueueKind, RecordId, SyncStatus, UpdateEntry,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("no quote with id {0}")]
    UnknownRecord(RecordId),
    #[error("quote {0} is queued for deletion")]
    PendingDelete(RecordId),
    #[error("no {kind} entry queued for {id}")]
    NotQueued { kind: &'static str, id: RecordId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Queued,
    Replaced,
    /// Target was an unconfirmed create; its payload absorbed the edit.
    FoldedIntoCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Queued,
    AlreadyQueued,
    /// Target was never confirmed, so it was dropped without a remote call.
    RemovedLocally,
}

/// A queue entry as handed to the orchestrator for one remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Create {
        temp_id: String,
        payload: QuotePayload,
    },
    Update {
        target: i64,
        payload: QuotePayload,
        enqueued_at: DateTime<Utc>,
    },
    Delete {
        target: i64,
    },
}

impl Dispatch {
    pub fn kind(&self) -> QueueKind {
        match self {
            Dispatch::Create { .. } => QueueKind::Create,
            Dispatch::Update { .. } => QueueKind::Update,
            Dispatch::Delete { .. } => QueueKind::Delete,
        }
    }

    pub fn record_id(&self) -> RecordId {
        match self {
            Dispatch::Create { temp_id, .. } => RecordId::Temp(temp_id.clone()),
            Dispatch::Update { target, .. } | Dispatch::Delete { target } => {
                RecordId::Remote(*target)
            }
        }
    }
}

/// Result of one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(i64),
    Applied,
    Failed(FailureKind),
}

/// How a completed dispatch was folded back into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Confirmed,
    Failed,
    /// A newer edit replaced the entry while the call was in flight; the
    /// entry stays queued with the newer payload.
    Superseded,
    /// The entry was cancelled while the call was in flight.
    Stale,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    quotes: Vec<Quote>,
    creates: Vec<CreateEntry>,
    updates: Vec<UpdateEntry>,
    deletes: Vec<DeleteEntry>,
    last_refresh: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts. Entries left `syncing` by an
    /// interrupted run go back to `pending`, and queued payloads and flags
    /// are laid over the snapshot again.
    pub fn restore(
        quotes: Vec<Quote>,
        creates: Vec<CreateEntry>,
        updates: Vec<UpdateEntry>,
        deletes: Vec<DeleteEntry>,
        last_refresh: Option<DateTime<Utc>>,
    ) -> (Self, usize) {
        let mut state = Self {
            quotes,
            creates,
            updates,
            deletes,
            last_refresh,
        };
        let reset = state.reset_in_flight();
        state.apply_overlays();
        (state, reset)
    }

    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    pub fn creates(&self) -> &[CreateEntry] {
        &self.creates
    }

    pub fn updates(&self) -> &[UpdateEntry] {
        &self.updates
    }

    pub fn deletes(&self) -> &[DeleteEntry] {
        &self.deletes
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    pub fn find(&self, id: &RecordId) -> Option<&Quote> {
        self.quotes.iter().find(|q| &q.id == id)
    }

    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            create: self.creates.len(),
            update: self.updates.len(),
            delete: self.deletes.len(),
        }
    }

    pub fn enqueue_create(&mut self, payload: QuotePayload, now: DateTime<Utc>) -> String {
        let temp_id = loop {
            if let RecordId::Temp(candidate) = RecordId::new_temp() {
                let taken = self.creates.iter().any(|c| c.temp_id == candidate)
                    || self.find(&RecordId::Temp(candidate.clone())).is_some();
                if !taken {
                    break candidate;
                }
            }
        };

        let mut quote = Quote::from_payload(RecordId::Temp(temp_id.clone()), payload.clone(), now);
        quote.is_queued = true;
        self.quotes.insert(0, quote);
        self.creates.push(CreateEntry {
            temp_id: temp_id.clone(),
            payload,
            enqueued_at: now,
            status: SyncStatus::Pending,
            retries: 0,
            last_failure: None,
        });
        temp_id
    }

    pub fn enqueue_update(
        &mut self,
        id: &RecordId,
        patch: &QuotePatch,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, QueueError> {
        let quote = self
            .quotes
            .iter_mut()
            .find(|q| &q.id == id)
            .ok_or_else(|| QueueError::UnknownRecord(id.clone()))?;

        let target = match id {
            RecordId::Temp(temp_id) => {
                patch.apply(quote);
                let payload = quote.payload();
                if let Some(entry) = self.creates.iter_mut().find(|c| &c.temp_id == temp_id) {
                    entry.payload = payload;
                }
                return Ok(UpdateOutcome::FoldedIntoCreate);
            }
            RecordId::Remote(target) => *target,
        };

        if quote.pending_delete {
            return Err(QueueError::PendingDelete(id.clone()));
        }
        patch.apply(quote);
        quote.pending_edit = true;
        let payload = quote.payload();

        if let Some(entry) = self.updates.iter_mut().find(|u| u.target == target) {
            entry.payload = payload;
            entry.enqueued_at = now;
            if entry.status != SyncStatus::Syncing {
                entry.status = SyncStatus::Pending;
            }
            return Ok(UpdateOutcome::Replaced);
        }

        self.updates.push(UpdateEntry {
            target,
            payload,
            enqueued_at: now,
            status: SyncStatus::Pending,
            retries: 0,
            last_failure: None,
        });
        Ok(UpdateOutcome::Queued)
    }

    /// Queue a delete. A pending update for the same id is dropped: the
    /// delete supersedes it.
    pub fn enqueue_delete(
        &mut self,
        id: &RecordId,
        now: DateTime<Utc>,
    ) -> Result<DeleteOutcome, QueueError> {
        let target = match id {
            RecordId::Temp(temp_id) => {
                self.remove_queued_create(temp_id)?;
                return Ok(DeleteOutcome::RemovedLocally);
            }
            RecordId::Remote(target) => *target,
        };

        if self.deletes.iter().any(|d| d.target == target) {
            return Ok(DeleteOutcome::AlreadyQueued);
        }
        let quote = self
            .quotes
            .iter_mut()
            .find(|q| &q.id == id)
            .ok_or_else(|| QueueError::UnknownRecord(id.clone()))?;
        quote.pending_edit = false;
        quote.pending_delete = true;

        self.updates.retain(|u| u.target != target);
        self.deletes.push(DeleteEntry {
            target,
            enqueued_at: now,
            status: SyncStatus::Pending,
            retries: 0,
            last_failure: None,
        });
        Ok(DeleteOutcome::Queued)
    }

    /// Drop an unconfirmed create together with its record.
    pub fn remove_queued_create(&mut self, temp_id: &str) -> Result<(), QueueError> {
        let before = self.creates.len();
        self.creates.retain(|c| c.temp_id != temp_id);
        let id = RecordId::Temp(temp_id.to_string());
        let had_quote = self.find(&id).is_some();
        self.quotes.retain(|q| q.id != id);
        if before == self.creates.len() && !had_quote {
            return Err(QueueError::UnknownRecord(id));
        }
        Ok(())
    }

    /// Cancel a pending edit. The visible record keeps the edited values
    /// until the next refresh from the remote authority.
    pub fn cancel_update(&mut self, target: i64) -> Result<(), QueueError> {
        let before = self.updates.len();
        self.updates.retain(|u| u.target != target);
        if before == self.updates.len() {
            return Err(QueueError::NotQueued {
                kind: QueueKind::Update.as_str(),
                id: RecordId::Remote(target),
            });
        }
        if let Some(q) = self.quotes.iter_mut().find(|q| q.id == RecordId::Remote(target)) {
            q.pending_edit = false;
        }
        Ok(())
    }

    pub fn cancel_delete(&mut self, target: i64) -> Result<(), QueueError> {
        let before = self.deletes.len();
        self.deletes.retain(|d| d.target != target);
        if before == self.deletes.len() {
            return Err(QueueError::NotQueued {
                kind: QueueKind::Delete.as_str(),
                id: RecordId::Remote(target),
            });
        }
        if let Some(q) = self.quotes.iter_mut().find(|q| q.id == RecordId::Remote(target)) {
            q.pending_delete = false;
        }
        Ok(())
    }

    pub fn cancel(&mut self, kind: QueueKind, id: &RecordId) -> Result<(), QueueError> {
        let not_queued = || QueueError::NotQueued {
            kind: kind.as_str(),
            id: id.clone(),
        };
        match (kind, id) {
            (QueueKind::Create, RecordId::Temp(temp_id)) => self.remove_queued_create(temp_id),
            (QueueKind::Update, RecordId::Remote(target)) => self.cancel_update(*target),
            (QueueKind::Delete, RecordId::Remote(target)) => self.cancel_delete(*target),
            _ => Err(not_queued()),
        }
    }

    /// Re-arm a failed (or parked) entry so the next run picks it up.
    pub fn retry(&mut self, kind: QueueKind, id: &RecordId) -> Result<(), QueueError> {
        let status = match (kind, id) {
            (QueueKind::Create, RecordId::Temp(temp_id)) => self
                .creates
                .iter_mut()
                .find(|c| &c.temp_id == temp_id)
                .map(|c| &mut c.status),
            (QueueKind::Update, RecordId::Remote(target)) => self
                .updates
                .iter_mut()
                .find(|u| u.target == *target)
                .map(|u| &mut u.status),
            (QueueKind::Delete, RecordId::Remote(target)) => self
                .deletes
                .iter_mut()
                .find(|d| d.target == *target)
                .map(|d| &mut d.status),
            _ => None,
        };
        match status {
            Some(status) => {
                if *status != SyncStatus::Syncing {
                    *status = SyncStatus::Pending;
                }
                Ok(())
            }
            None => Err(QueueError::NotQueued {
                kind: kind.as_str(),
                id: id.clone(),
            }),
        }
    }

    /// Entries eligible for the next run of `kind`, in insertion order.
    /// In-flight entries are skipped, and so are entries parked after
    /// `rejection_limit` rejections (0 disables parking).
    pub fn dispatches(&self, kind: QueueKind, rejection_limit: u32) -> Vec<Dispatch> {
        let eligible = |status: SyncStatus, retries: u32, last: Option<FailureKind>| {
            if status == SyncStatus::Syncing {
                return false;
            }
            let parked = rejection_limit > 0
                && status == SyncStatus::Failed
                && last == Some(FailureKind::Rejected)
                && retries >= rejection_limit;
            !parked
        };
        match kind {
            QueueKind::Create => self
                .creates
                .iter()
                .filter(|c| eligible(c.status, c.retries, c.last_failure))
                .map(|c| Dispatch::Create {
                    temp_id: c.temp_id.clone(),
                    payload: c.payload.clone(),
                })
                .collect(),
            QueueKind::Update => self
                .updates
                .iter()
                .filter(|u| eligible(u.status, u.retries, u.last_failure))
                .map(|u| Dispatch::Update {
                    target: u.target,
                    payload: u.payload.clone(),
                    enqueued_at: u.enqueued_at,
                })
                .collect(),
            QueueKind::Delete => self
                .deletes
                .iter()
                .filter(|d| eligible(d.status, d.retries, d.last_failure))
                .map(|d| Dispatch::Delete { target: d.target })
                .collect(),
        }
    }

    /// Mark the entry behind `dispatch` as in flight. Returns false when it
    /// was cancelled since the run took its snapshot; the caller skips it.
    pub fn begin(&mut self, dispatch: &Dispatch) -> bool {
        let status = match dispatch {
            Dispatch::Create { temp_id, .. } => self
                .creates
                .iter_mut()
                .find(|c| &c.temp_id == temp_id)
                .map(|c| &mut c.status),
            Dispatch::Update { target, .. } => self
                .updates
                .iter_mut()
                .find(|u| u.target == *target)
                .map(|u| &mut u.status),
            Dispatch::Delete { target } => self
                .deletes
                .iter_mut()
                .find(|d| d.target == *target)
                .map(|d| &mut d.status),
        };
        match status {
            Some(status) => {
                *status = SyncStatus::Syncing;
                true
            }
            None => false,
        }
    }

    /// Fold the result of a remote call back into the state.
    pub fn complete(&mut self, dispatch: &Dispatch, outcome: Outcome) -> Settled {
        match (dispatch, outcome) {
            (_, Outcome::Failed(kind)) => self.fail(dispatch, kind),
            (Dispatch::Create { temp_id, payload }, Outcome::Created(remote_id)) => {
                self.confirm_create(temp_id, payload, remote_id)
            }
            (Dispatch::Create { .. }, Outcome::Applied) => {
                self.fail(dispatch, FailureKind::Rejected)
            }
            (
                Dispatch::Update {
                    target,
                    enqueued_at,
                    ..
                },
                _,
            ) => self.confirm_update(*target, *enqueued_at),
            (Dispatch::Delete { target }, _) => self.confirm_delete(*target),
        }
    }

    /// Remap the record to its permanent id. An edit folded into the
    /// create after it was dispatched becomes an update for the new id.
    fn confirm_create(&mut self, temp_id: &str, sent: &QuotePayload, remote_id: i64) -> Settled {
        let Some(pos) = self.creates.iter().position(|c| c.temp_id == temp_id) else {
            return Settled::Stale;
        };
        let entry = self.creates.remove(pos);
        let edited = entry.payload != *sent;
        if edited {
            self.updates.retain(|u| u.target != remote_id);
            self.updates.push(UpdateEntry {
                target: remote_id,
                payload: entry.payload,
                enqueued_at: Utc::now(),
                status: SyncStatus::Pending,
                retries: 0,
                last_failure: None,
            });
        }
        let temp = RecordId::Temp(temp_id.to_string());
        if let Some(q) = self.quotes.iter_mut().find(|q| q.id == temp) {
            q.id = RecordId::Remote(remote_id);
            q.is_queued = false;
            q.pending_edit = edited;
        }
        Settled::Confirmed
    }

    fn confirm_update(&mut self, target: i64, dispatched_at: DateTime<Utc>) -> Settled {
        let Some(pos) = self.updates.iter().position(|u| u.target == target) else {
            return Settled::Stale;
        };
        if self.updates[pos].enqueued_at != dispatched_at {
            self.updates[pos].status = SyncStatus::Pending;
            return Settled::Superseded;
        }
        self.updates.remove(pos);
        if let Some(q) = self.quotes.iter_mut().find(|q| q.id == RecordId::Remote(target)) {
            q.pending_edit = false;
        }
        Settled::Confirmed
    }

    fn confirm_delete(&mut self, target: i64) -> Settled {
        let before = self.deletes.len();
        self.deletes.retain(|d| d.target != target);
        self.updates.retain(|u| u.target != target);
        self.quotes.retain(|q| q.id != RecordId::Remote(target));
        if before == self.deletes.len() {
            Settled::Stale
        } else {
            Settled::Confirmed
        }
    }

    fn fail(&mut self, dispatch: &Dispatch, kind: FailureKind) -> Settled {
        fn mark(status: &mut SyncStatus, retries: &mut u32, last: &mut Option<FailureKind>, kind: FailureKind) {
            *status = SyncStatus::Failed;
            *retries += 1;
            *last = Some(kind);
        }
        match dispatch {
            Dispatch::Create { temp_id, .. } => {
                match self.creates.iter_mut().find(|c| &c.temp_id == temp_id) {
                    Some(c) => mark(&mut c.status, &mut c.retries, &mut c.last_failure, kind),
                    None => return Settled::Stale,
                }
            }
            Dispatch::Update {
                target,
                enqueued_at,
                ..
            } => match self.updates.iter_mut().find(|u| u.target == *target) {
                Some(u) if u.enqueued_at == *enqueued_at => {
                    mark(&mut u.status, &mut u.retries, &mut u.last_failure, kind)
                }
                Some(u) => {
                    u.status = SyncStatus::Pending;
                    return Settled::Superseded;
                }
                None => return Settled::Stale,
            },
            Dispatch::Delete { target } => {
                match self.deletes.iter_mut().find(|d| d.target == *target) {
                    Some(d) => mark(&mut d.status, &mut d.retries, &mut d.last_failure, kind),
                    None => return Settled::Stale,
                }
            }
        }
        Settled::Failed
    }

    /// Replace the confirmed part of the snapshot with a fresh remote list.
    /// Unconfirmed local records stay in front; remote records that still
    /// have queued edits or deletes get those laid over again, so a pending
    /// deletion never comes back as an ordinary record.
    pub fn merge_remote(&mut self, remote: Vec<Quote>, now: DateTime<Utc>) {
        let mut merged: Vec<Quote> = self.quotes.iter().filter(|q| q.is_queued).cloned().collect();
        merged.extend(remote.into_iter().map(|mut q| {
            q.clear_flags();
            q
        }));
        self.quotes = merged;
        self.apply_overlays();
        self.last_refresh = Some(now);
    }

    fn reset_in_flight(&mut self) -> usize {
        let mut reset = 0;
        let statuses = self
            .creates
            .iter_mut()
            .map(|c| &mut c.status)
            .chain(self.updates.iter_mut().map(|u| &mut u.status))
            .chain(self.deletes.iter_mut().map(|d| &mut d.status));
        for status in statuses {
            if *status == SyncStatus::Syncing {
                *status = SyncStatus::Pending;
                reset += 1;
            }
        }
        reset
    }

    fn apply_overlays(&mut self) {
        for entry in self.creates.iter().rev() {
            let id = RecordId::Temp(entry.temp_id.clone());
            if !self.quotes.iter().any(|q| q.id == id) {
                let mut quote = Quote::from_payload(id, entry.payload.clone(), entry.enqueued_at);
                quote.is_queued = true;
                self.quotes.insert(0, quote);
            }
        }
        for entry in &self.updates {
            if let Some(q) = self
                .quotes
                .iter_mut()
                .find(|q| q.id == RecordId::Remote(entry.target))
            {
                QuotePatch::from(entry.payload.clone()).apply(q);
                q.pending_edit = true;
            }
        }
        for entry in &self.deletes {
            if let Some(q) = self
                .quotes
                .iter_mut()
                .find(|q| q.id == RecordId::Remote(entry.target))
            {
                q.pending_delete = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuoteStatus;

    fn remote_quote(id: i64, product: &str) -> Quote {
        Quote::from_payload(RecordId::Remote(id), QuotePayload::new(product, 1), Utc::now())
    }

    fn state_with_remote(ids: &[i64]) -> SyncState {
        let mut state = SyncState::new();
        state.merge_remote(ids.iter().map(|id| remote_quote(*id, "Box")).collect(), Utc::now());
        state
    }

    #[test]
    fn create_is_visible_before_any_sync() {
        let mut state = SyncState::new();
        let temp = state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        assert!(temp.starts_with("temp_"));
        let q = &state.quotes()[0];
        assert_eq!(q.id, RecordId::Temp(temp));
        assert!(q.is_queued);
        assert!(!q.pending_edit && !q.pending_delete);
        assert_eq!(state.counts().create, 1);
    }

    #[test]
    fn second_update_replaces_first() {
        let mut state = state_with_remote(&[9]);
        let id = RecordId::Remote(9);
        let first = QuotePatch {
            quantity: Some(2),
            ..Default::default()
        };
        let second = QuotePatch {
            quantity: Some(3),
            notes: Some("rush".into()),
            ..Default::default()
        };
        assert_eq!(
            state.enqueue_update(&id, &first, Utc::now()).unwrap(),
            UpdateOutcome::Queued
        );
        assert_eq!(
            state.enqueue_update(&id, &second, Utc::now()).unwrap(),
            UpdateOutcome::Replaced
        );
        assert_eq!(state.updates().len(), 1);
        assert_eq!(state.updates()[0].payload.quantity, 3);
        assert_eq!(state.updates()[0].payload.notes, "rush");
        assert!(state.find(&id).unwrap().pending_edit);
    }

    #[test]
    fn edit_of_unconfirmed_create_folds_into_payload() {
        let mut state = SyncState::new();
        let temp = state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        let patch = QuotePatch {
            status: Some(QuoteStatus::Approved),
            ..Default::default()
        };
        let outcome = state
            .enqueue_update(&RecordId::Temp(temp), &patch, Utc::now())
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::FoldedIntoCreate);
        assert!(state.updates().is_empty());
        assert_eq!(state.creates()[0].payload.status, QuoteStatus::Approved);
        assert!(!state.quotes()[0].pending_edit);
    }

    #[test]
    fn deleting_unconfirmed_create_is_local_only() {
        let mut state = SyncState::new();
        let temp = state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        let outcome = state
            .enqueue_delete(&RecordId::Temp(temp), Utc::now())
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::RemovedLocally);
        assert!(state.quotes().is_empty());
        assert_eq!(state.counts().total(), 0);
    }

    #[test]
    fn duplicate_delete_is_noop_and_supersedes_update() {
        let mut state = state_with_remote(&[4]);
        let id = RecordId::Remote(4);
        state
            .enqueue_update(&id, &QuotePatch { quantity: Some(8), ..Default::default() }, Utc::now())
            .unwrap();
        assert_eq!(state.enqueue_delete(&id, Utc::now()).unwrap(), DeleteOutcome::Queued);
        assert_eq!(
            state.enqueue_delete(&id, Utc::now()).unwrap(),
            DeleteOutcome::AlreadyQueued
        );
        assert_eq!(state.deletes().len(), 1);
        assert!(state.updates().is_empty());
        let q = state.find(&id).unwrap();
        assert!(q.pending_delete && !q.pending_edit);

        let err = state
            .enqueue_update(&id, &QuotePatch::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, QueueError::PendingDelete(id));
    }

    #[test]
    fn cancel_clears_flags() {
        let mut state = state_with_remote(&[1, 2]);
        state
            .enqueue_update(&RecordId::Remote(1), &QuotePatch::default(), Utc::now())
            .unwrap();
        state.enqueue_delete(&RecordId::Remote(2), Utc::now()).unwrap();

        state.cancel(QueueKind::Update, &RecordId::Remote(1)).unwrap();
        state.cancel(QueueKind::Delete, &RecordId::Remote(2)).unwrap();
        assert_eq!(state.counts().total(), 0);
        assert!(state.quotes().iter().all(|q| !q.pending_edit && !q.pending_delete));
        assert!(matches!(
            state.cancel_update(1),
            Err(QueueError::NotQueued { .. })
        ));
    }

    #[test]
    fn confirmed_create_remaps_identity_once() {
        let mut state = SyncState::new();
        let temp = state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        let dispatch = state.dispatches(QueueKind::Create, 0).remove(0);
        assert!(state.begin(&dispatch));
        assert_eq!(state.creates()[0].status, SyncStatus::Syncing);
        assert!(state.dispatches(QueueKind::Create, 0).is_empty());

        assert_eq!(state.complete(&dispatch, Outcome::Created(42)), Settled::Confirmed);
        assert_eq!(state.quotes()[0].id, RecordId::Remote(42));
        assert!(!state.quotes()[0].is_queued);
        assert!(state.find(&RecordId::Temp(temp)).is_none());

        assert_eq!(state.complete(&dispatch, Outcome::Created(43)), Settled::Stale);
        assert_eq!(state.quotes().len(), 1);
        assert_eq!(state.quotes()[0].id, RecordId::Remote(42));
    }

    #[test]
    fn failures_accumulate_and_rejections_can_park() {
        let mut state = SyncState::new();
        state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        for _ in 0..3 {
            let d = state.dispatches(QueueKind::Create, 0).remove(0);
            state.begin(&d);
            assert_eq!(
                state.complete(&d, Outcome::Failed(FailureKind::Rejected)),
                Settled::Failed
            );
        }
        let entry = &state.creates()[0];
        assert_eq!(entry.retries, 3);
        assert_eq!(entry.status, SyncStatus::Failed);
        assert_eq!(entry.last_failure, Some(FailureKind::Rejected));

        assert!(state.dispatches(QueueKind::Create, 3).is_empty());
        assert_eq!(state.dispatches(QueueKind::Create, 0).len(), 1);

        let temp = RecordId::Temp(entry.temp_id.clone());
        state.retry(QueueKind::Create, &temp).unwrap();
        assert_eq!(state.dispatches(QueueKind::Create, 3).len(), 1);
    }

    #[test]
    fn edit_during_flight_keeps_newer_payload() {
        let mut state = state_with_remote(&[5]);
        let id = RecordId::Remote(5);
        let t0 = Utc::now();
        state
            .enqueue_update(&id, &QuotePatch { quantity: Some(2), ..Default::default() }, t0)
            .unwrap();
        let d = state.dispatches(QueueKind::Update, 0).remove(0);
        state.begin(&d);
        state
            .enqueue_update(
                &id,
                &QuotePatch { quantity: Some(7), ..Default::default() },
                t0 + chrono::Duration::seconds(1),
            )
            .unwrap();

        assert_eq!(state.complete(&d, Outcome::Applied), Settled::Superseded);
        assert_eq!(state.updates().len(), 1);
        assert_eq!(state.updates()[0].payload.quantity, 7);
        assert_eq!(state.updates()[0].status, SyncStatus::Pending);
        assert!(state.find(&id).unwrap().pending_edit);
    }

    #[test]
    fn edit_folded_during_create_flight_becomes_update() {
        let mut state = SyncState::new();
        let temp = state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        let d = state.dispatches(QueueKind::Create, 0).remove(0);
        state.begin(&d);
        let outcome = state
            .enqueue_update(
                &RecordId::Temp(temp),
                &QuotePatch { quantity: Some(9), ..Default::default() },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::FoldedIntoCreate);

        assert_eq!(state.complete(&d, Outcome::Created(42)), Settled::Confirmed);
        assert!(state.creates().is_empty());
        assert_eq!(state.updates().len(), 1);
        assert_eq!(state.updates()[0].target, 42);
        assert_eq!(state.updates()[0].payload.quantity, 9);
        assert_eq!(state.updates()[0].status, SyncStatus::Pending);

        let q = state.find(&RecordId::Remote(42)).unwrap();
        assert_eq!(q.quantity, 9);
        assert!(q.pending_edit && !q.is_queued);

        let next = state.dispatches(QueueKind::Update, 0);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].record_id(), RecordId::Remote(42));
    }

    #[test]
    fn unchanged_create_confirms_without_follow_up_update() {
        let mut state = SyncState::new();
        state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        let d = state.dispatches(QueueKind::Create, 0).remove(0);
        state.begin(&d);
        assert_eq!(state.complete(&d, Outcome::Created(42)), Settled::Confirmed);
        assert!(state.updates().is_empty());
        assert!(!state.quotes()[0].pending_edit);
    }

    #[test]
    fn cancel_update_during_flight_leaves_late_result_stale() {
        let mut state = state_with_remote(&[6]);
        let id = RecordId::Remote(6);
        state
            .enqueue_update(&id, &QuotePatch { quantity: Some(4), ..Default::default() }, Utc::now())
            .unwrap();
        let d = state.dispatches(QueueKind::Update, 0).remove(0);
        assert!(state.begin(&d));
        state.cancel_update(6).unwrap();

        assert_eq!(state.complete(&d, Outcome::Applied), Settled::Stale);
        assert_eq!(state.counts().total(), 0);
        let q = state.find(&id).unwrap();
        assert!(!q.pending_edit && !q.pending_delete && !q.is_queued);
    }

    #[test]
    fn cancel_delete_during_flight_keeps_record() {
        let mut state = state_with_remote(&[7]);
        let id = RecordId::Remote(7);
        state.enqueue_delete(&id, Utc::now()).unwrap();
        let d = state.dispatches(QueueKind::Delete, 0).remove(0);
        assert!(state.begin(&d));
        state.cancel_delete(7).unwrap();

        assert_eq!(
            state.complete(&d, Outcome::Failed(FailureKind::Connectivity)),
            Settled::Stale
        );
        let q = state.find(&id).unwrap();
        assert!(!q.pending_delete && !q.pending_edit);
        assert_eq!(state.counts().total(), 0);
    }

    #[test]
    fn removing_create_during_flight_leaves_no_temp_record() {
        let mut state = SyncState::new();
        let temp = state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        let d = state.dispatches(QueueKind::Create, 0).remove(0);
        assert!(state.begin(&d));
        state.remove_queued_create(&temp).unwrap();

        assert_eq!(state.complete(&d, Outcome::Created(42)), Settled::Stale);
        assert!(state.quotes().is_empty());
        assert!(state.find(&RecordId::Temp(temp)).is_none());
        assert!(state.find(&RecordId::Remote(42)).is_none());
        assert_eq!(state.counts().total(), 0);
    }

    #[test]
    fn cancelled_entry_is_skipped_by_begin() {
        let mut state = state_with_remote(&[3]);
        state.enqueue_delete(&RecordId::Remote(3), Utc::now()).unwrap();
        let d = state.dispatches(QueueKind::Delete, 0).remove(0);
        state.cancel_delete(3).unwrap();
        assert!(!state.begin(&d));
    }

    #[test]
    fn merge_keeps_queued_first_and_pending_flags() {
        let mut state = state_with_remote(&[1, 2, 3]);
        state.enqueue_delete(&RecordId::Remote(2), Utc::now()).unwrap();
        state
            .enqueue_update(
                &RecordId::Remote(3),
                &QuotePatch { product: Some("Edited".into()), ..Default::default() },
                Utc::now(),
            )
            .unwrap();
        let temp = state.enqueue_create(QuotePayload::new("Local", 1), Utc::now());

        let fresh = vec![remote_quote(1, "Box"), remote_quote(2, "Box"), remote_quote(3, "Box")];
        state.merge_remote(fresh, Utc::now());

        let ids: Vec<RecordId> = state.quotes().iter().map(|q| q.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                RecordId::Temp(temp),
                RecordId::Remote(1),
                RecordId::Remote(2),
                RecordId::Remote(3)
            ]
        );
        assert!(state.find(&RecordId::Remote(2)).unwrap().pending_delete);
        let edited = state.find(&RecordId::Remote(3)).unwrap();
        assert!(edited.pending_edit);
        assert_eq!(edited.product, "Edited");
        assert!(state.last_refresh().is_some());
    }

    #[test]
    fn restore_resets_in_flight_entries() {
        let mut state = SyncState::new();
        state.enqueue_create(QuotePayload::new("Widget", 5), Utc::now());
        let d = state.dispatches(QueueKind::Create, 0).remove(0);
        state.begin(&d);

        let (restored, reset) = SyncState::restore(
            Vec::new(),
            state.creates().to_vec(),
            Vec::new(),
            Vec::new(),
            None,
        );
        assert_eq!(reset, 1);
        assert_eq!(restored.creates()[0].status, SyncStatus::Pending);
        assert_eq!(restored.quotes().len(), 1);
        assert!(restored.quotes()[0].is_queued);
    }
}
