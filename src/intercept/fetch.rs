use crate::db::CachedResponse;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            accept: None,
            content_type: None,
            body: None,
        }
    }

    /// A page navigation, as a browser would send it.
    pub fn navigate(url: Url) -> Self {
        Self {
            accept: Some("text/html,application/xhtml+xml".into()),
            ..Self::get(url)
        }
    }

    pub fn delete(url: Url) -> Self {
        Self {
            method: Method::Delete,
            ..Self::get(url)
        }
    }

    pub fn json<T: Serialize>(method: Method, url: Url, body: &T) -> serde_json::Result<Self> {
        Ok(Self {
            method,
            url,
            accept: Some("application/json".into()),
            content_type: Some("application/json".into()),
            body: Some(serde_json::to_vec(body)?),
        })
    }

    pub fn is_navigation(&self) -> bool {
        self.accept
            .as_deref()
            .map(|a| a.contains("text/html"))
            .unwrap_or(false)
    }

    /// Request identity used for cache lookups: method plus full URL.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Synthesized by the interception layer while offline.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl Response {
    pub fn synthesized(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: Some(content_type.to_string()),
            body: body.into(),
            source: ResponseSource::Fallback,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_offline_fallback(&self) -> bool {
        self.source == ResponseSource::Fallback
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<CachedResponse> for Response {
    fn from(c: CachedResponse) -> Self {
        Self {
            status: c.status,
            content_type: c.content_type,
            body: c.body,
            source: ResponseSource::Cache,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    Transport(String),
    #[error("interception worker is not running")]
    WorkerGone,
}

/// Anything that turns a request into a response: the network itself, or
/// the interception worker sitting in front of it.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}

/// Plain network transport over reqwest.
#[derive(Debug, Clone)]
pub struct NetworkFetcher {
    http: Client,
}

impl NetworkFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("quote-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetch for NetworkFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.http.request(method, request.url.clone());
        if let Some(accept) = &request.accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        if let Some(ct) = &request.content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let res = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = res.status().as_u16();
        let content_type = res
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = res
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .to_vec();
        debug!(method = %request.method, url = %request.url, status, "network response");
        Ok(Response {
            status,
            content_type,
            body,
            source: ResponseSource::Network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_is_detected_from_accept() {
        let url = Url::parse("http://localhost/dashboard").unwrap();
        assert!(Request::navigate(url.clone()).is_navigation());
        assert!(!Request::get(url.clone()).is_navigation());
        assert_eq!(
            Request::get(url).cache_key(),
            "GET http://localhost/dashboard"
        );
    }
}
