use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a quote: a local placeholder until the remote authority
/// assigns its own integer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Remote(i64),
    Temp(String),
}

impl RecordId {
    /// Fresh temporary id of the form `temp_<unix-millis>_<9 chars>`.
    pub fn new_temp() -> Self {
        let entropy = Uuid::new_v4().simple().to_string();
        RecordId::Temp(format!(
            "temp_{}_{}",
            Utc::now().timestamp_millis(),
            &entropy[..9]
        ))
    }

    /// Parse user input: integers are remote ids, anything else is temporary.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim().trim_start_matches('#');
        match trimmed.parse::<i64>() {
            Ok(id) => RecordId::Remote(id),
            Err(_) => RecordId::Temp(trimmed.to_string()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Remote(id) => write!(f, "{}", id),
            RecordId::Temp(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Approved => "approved",
            QuoteStatus::Rejected => "rejected",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QuoteStatus::Pending),
            "approved" => Some(QuoteStatus::Approved),
            "rejected" => Some(QuoteStatus::Rejected),
            _ => None,
        }
    }
}

/// Every editable field of a quote. This is what create and update ship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePayload {
    pub product: String,
    pub quantity: i64,
    #[serde(default)]
    pub desired_packaging: String,
    #[serde(default)]
    pub estimated_price: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: QuoteStatus,
}

impl QuotePayload {
    pub fn new(product: impl Into<String>, quantity: i64) -> Self {
        Self {
            product: product.into(),
            quantity,
            desired_packaging: String::new(),
            estimated_price: 0.0,
            notes: String::new(),
            status: QuoteStatus::Pending,
        }
    }
}

/// Partial edit. Merge precedence, field by field: a `Some` in the patch
/// replaces the record value, a `None` keeps it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePatch {
    pub product: Option<String>,
    pub quantity: Option<i64>,
    pub desired_packaging: Option<String>,
    pub estimated_price: Option<f64>,
    pub notes: Option<String>,
    pub status: Option<QuoteStatus>,
}

impl QuotePatch {
    pub fn is_empty(&self) -> bool {
        *self == QuotePatch::default()
    }

    pub fn apply(&self, quote: &mut Quote) {
        if let Some(product) = &self.product {
            quote.product = product.clone();
        }
        if let Some(quantity) = self.quantity {
            quote.quantity = quantity;
        }
        if let Some(packaging) = &self.desired_packaging {
            quote.desired_packaging = packaging.clone();
        }
        if let Some(price) = self.estimated_price {
            quote.estimated_price = price;
        }
        if let Some(notes) = &self.notes {
            quote.notes = notes.clone();
        }
        if let Some(status) = self.status {
            quote.status = status;
        }
    }
}

impl From<QuotePayload> for QuotePatch {
    fn from(p: QuotePayload) -> Self {
        Self {
            product: Some(p.product),
            quantity: Some(p.quantity),
            desired_packaging: Some(p.desired_packaging),
            estimated_price: Some(p.estimated_price),
            notes: Some(p.notes),
            status: Some(p.status),
        }
    }
}

/// A quotation as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: RecordId,
    pub product: String,
    pub quantity: i64,
    #[serde(default)]
    pub desired_packaging: String,
    #[serde(default)]
    pub estimated_price: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_queued: bool,
    #[serde(default)]
    pub pending_edit: bool,
    #[serde(default)]
    pub pending_delete: bool,
}

impl Quote {
    pub fn from_payload(id: RecordId, payload: QuotePayload, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            product: payload.product,
            quantity: payload.quantity,
            desired_packaging: payload.desired_packaging,
            estimated_price: payload.estimated_price,
            notes: payload.notes,
            status: payload.status,
            created_at,
            is_queued: false,
            pending_edit: false,
            pending_delete: false,
        }
    }

    pub fn payload(&self) -> QuotePayload {
        QuotePayload {
            product: self.product.clone(),
            quantity: self.quantity,
            desired_packaging: self.desired_packaging.clone(),
            estimated_price: self.estimated_price,
            notes: self.notes.clone(),
            status: self.status,
        }
    }

    /// Drop every local-only flag; used when a record arrives from the remote.
    pub fn clear_flags(&mut self) {
        self.is_queued = false;
        self.pending_edit = false;
        self.pending_delete = false;
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Syncing,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Why the last replay of an entry failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Request never reached the remote authority.
    Connectivity,
    /// Remote authority answered with an error or an unusable body.
    Rejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connectivity => "connectivity",
            FailureKind::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Create,
    Update,
    Delete,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Create => "create",
            QueueKind::Update => "update",
            QueueKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntry {
    pub temp_id: String,
    pub payload: QuotePayload,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub last_failure: Option<FailureKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntry {
    pub target: i64,
    pub payload: QuotePayload,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub last_failure: Option<FailureKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEntry {
    pub target: i64,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub last_failure: Option<FailureKind>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.create + self.update + self.delete
    }
}

/// Outcome of replaying one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub kind: QueueKind,
    pub succeeded: usize,
    pub failed: usize,
    /// Calls whose result no longer matched the queue: superseded by a
    /// newer edit or cancelled while in flight.
    pub skipped: usize,
}

impl BatchReport {
    pub fn empty(kind: QueueKind) -> Self {
        Self {
            kind,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }
}
