use crate::intercept::fetch::{Fetch, FetchError, Method, Request, Response, ResponseSource};
use crate::model::{FailureKind, Quote, QuotePayload};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Connectivity(String),
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Connectivity(_) => FailureKind::Connectivity,
            RemoteError::Rejected { .. } => FailureKind::Rejected,
        }
    }

    fn rejected(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status,
            message: message.into(),
        }
    }
}

impl From<FetchError> for RemoteError {
    fn from(e: FetchError) -> Self {
        RemoteError::Connectivity(e.to_string())
    }
}

/// The remote quotation authority.
#[async_trait]
pub trait QuoteRemote: Send + Sync {
    /// Create a record; returns the permanent id the authority assigned.
    async fn create(&self, payload: &QuotePayload) -> Result<i64, RemoteError>;
    async fn update(&self, id: i64, payload: &QuotePayload) -> Result<(), RemoteError>;
    async fn delete(&self, id: i64) -> Result<(), RemoteError>;
    async fn list(&self) -> Result<Vec<Quote>, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

/// JSON client for the `api/quotes` endpoints. Every request goes through
/// `transport`, which in production is the interception worker.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: Url,
    transport: Arc<dyn Fetch>,
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(base_url: Url, transport: Arc<dyn Fetch>) -> Self {
        Self {
            base_url,
            transport,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::rejected(0, format!("invalid endpoint {}: {}", path, e)))
    }

    async fn acknowledged(&self, request: Request) -> Result<Ack, RemoteError> {
        let res = self.transport.fetch(request).await?;
        if res.is_offline_fallback() {
            return Err(RemoteError::Connectivity("served offline fallback".into()));
        }
        check_status(&res)?;
        let ack: Ack = res
            .json()
            .map_err(|e| RemoteError::rejected(res.status, format!("undecodable body: {}", e)))?;
        if !ack.success {
            let message = ack
                .message
                .unwrap_or_else(|| "remote reported failure".to_string());
            return Err(RemoteError::rejected(res.status, message));
        }
        Ok(ack)
    }
}

fn check_status(res: &Response) -> Result<(), RemoteError> {
    if res.is_success() {
        return Ok(());
    }
    let message: String = res.text().chars().take(200).collect();
    Err(RemoteError::rejected(res.status, message))
}

#[async_trait]
impl QuoteRemote for HttpRemote {
    #[instrument(skip_all)]
    async fn create(&self, payload: &QuotePayload) -> Result<i64, RemoteError> {
        let url = self.endpoint("api/quotes")?;
        let request = Request::json(Method::Post, url, payload)
            .map_err(|e| RemoteError::rejected(0, e.to_string()))?;
        let ack = self.acknowledged(request).await?;
        ack.id
            .ok_or_else(|| RemoteError::rejected(200, "create acknowledged without an id"))
    }

    #[instrument(skip_all, fields(id = id))]
    async fn update(&self, id: i64, payload: &QuotePayload) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("api/quotes/{}", id))?;
        let request = Request::json(Method::Put, url, payload)
            .map_err(|e| RemoteError::rejected(0, e.to_string()))?;
        self.acknowledged(request).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(id = id))]
    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("api/quotes/{}", id))?;
        self.acknowledged(Request::delete(url)).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn list(&self) -> Result<Vec<Quote>, RemoteError> {
        let url = self.endpoint("api/quotes")?;
        let res = self.transport.fetch(Request::get(url)).await?;
        if res.is_offline_fallback() {
            return Err(RemoteError::Connectivity("served offline fallback".into()));
        }
        check_status(&res)?;
        let quotes: Vec<Quote> = res
            .json()
            .map_err(|e| RemoteError::rejected(res.status, format!("undecodable list: {}", e)))?;
        if res.source == ResponseSource::Cache {
            warn!(count = quotes.len(), "quote list served from cache; it may predate confirmed changes");
        } else {
            debug!(count = quotes.len(), "fetched quote list");
        }
        Ok(quotes)
    }
}
