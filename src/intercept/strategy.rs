//! Request classification and the four caching strategies.

use super::fetch::{Fetch, FetchError, Request, Response};
use super::namespace::{NamespaceKind, Namespaces};
use crate::config::Cache as CacheSettings;
use crate::db::{self, Pool};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static STATIC_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(css|js|png|jpe?g|gif|svg|ico|woff2?|ttf)$").expect("static asset pattern")
});

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Offline</title>
<style>
body { font-family: sans-serif; display: flex; min-height: 100vh; align-items: center; justify-content: center; text-align: center; }
</style>
</head>
<body>
<div>
<h1>You are offline</h1>
<p>No network connection. Check your connection and try again.</p>
<button onclick="location.reload()">Retry</button>
</div>
</body>
</html>
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Api,
    Static,
    Navigation,
    Other,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    api_prefix: String,
    asset_hosts: Vec<String>,
}

impl Classifier {
    pub fn new(api_prefix: impl Into<String>, asset_hosts: Vec<String>) -> Self {
        Self {
            api_prefix: api_prefix.into(),
            asset_hosts,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.api_prefix.clone(), settings.asset_hosts.clone())
    }

    /// First match wins: API path, static asset, page navigation, other.
    pub fn classify(&self, request: &Request) -> ResourceClass {
        let url = &request.url;
        if url.path().starts_with(&self.api_prefix) {
            return ResourceClass::Api;
        }
        let known_host = url
            .host_str()
            .map(|h| self.asset_hosts.iter().any(|a| a == h))
            .unwrap_or(false);
        if known_host || STATIC_EXTENSION.is_match(url.path()) {
            return ResourceClass::Static;
        }
        if request.is_navigation() {
            return ResourceClass::Navigation;
        }
        ResourceClass::Other
    }
}

/// Shared context of every strategy: the cache tables, the real network
/// and the current namespace names.
#[derive(Clone)]
pub struct Strategies {
    pool: Pool,
    network: Arc<dyn Fetch>,
    names: Namespaces,
    shell_path: String,
}

impl Strategies {
    pub fn new(pool: Pool, network: Arc<dyn Fetch>, names: Namespaces, shell_path: String) -> Self {
        Self {
            pool,
            network,
            names,
            shell_path,
        }
    }

    pub fn network(&self) -> &Arc<dyn Fetch> {
        &self.network
    }

    /// Any namespace, first hit wins. Store errors count as a miss.
    async fn lookup(&self, key: &str) -> Option<Response> {
        match db::cache::match_response(&self.pool, None, key).await {
            Ok(hit) => hit.map(Response::from),
            Err(err) => {
                warn!(?err, key, "cache lookup failed");
                None
            }
        }
    }

    /// Store a 2xx response; anything else is left out of the cache.
    pub(crate) async fn store(&self, kind: NamespaceKind, key: &str, res: &Response) {
        if !res.is_success() {
            return;
        }
        let namespace = self.names.name(kind);
        if let Err(err) = db::cache::put_response(
            &self.pool,
            &namespace,
            key,
            res.status,
            res.content_type.as_deref(),
            &res.body,
        )
        .await
        {
            warn!(?err, key, %namespace, "failed to store response");
        }
    }

    /// Network first. Offline, the last cached copy is served, else an
    /// empty JSON array marked as a fallback. Never an error.
    pub async fn network_first_api(&self, request: Request) -> Response {
        let key = request.cache_key();
        match self.network.fetch(request).await {
            Ok(res) => {
                self.store(NamespaceKind::Api, &key, &res).await;
                res
            }
            Err(err) => {
                debug!(%err, key, "api request offline");
                if let Some(cached) = self.lookup(&key).await {
                    info!(key, "serving api response from cache");
                    return cached;
                }
                Response::synthesized(200, "application/json", "[]")
            }
        }
    }

    /// Cache first; a miss costs exactly one network call.
    pub async fn cache_first(&self, request: Request) -> Response {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(&key).await {
            return cached;
        }
        match self.network.fetch(request).await {
            Ok(res) => {
                self.store(NamespaceKind::Static, &key, &res).await;
                res
            }
            Err(err) => {
                warn!(%err, key, "static asset unavailable");
                Response::synthesized(503, "text/plain", "Offline")
            }
        }
    }

    /// Network first for page loads. Offline: exact cached copy, then the
    /// cached application shell, then the built-in offline page.
    pub async fn navigation(&self, request: Request) -> Response {
        let key = request.cache_key();
        let shell_key = request
            .url
            .join(&self.shell_path)
            .map(|u| Request::get(u).cache_key())
            .ok();
        match self.network.fetch(request).await {
            Ok(res) => {
                self.store(NamespaceKind::Dynamic, &key, &res).await;
                res
            }
            Err(err) => {
                debug!(%err, key, "navigation offline");
                if let Some(cached) = self.lookup(&key).await {
                    return cached;
                }
                if let Some(shell_key) = shell_key {
                    if let Some(shell) = self.lookup(&shell_key).await {
                        info!(key, "serving cached application shell");
                        return shell;
                    }
                }
                Response::synthesized(200, "text/html; charset=utf-8", OFFLINE_PAGE)
            }
        }
    }

    /// Serve the cached copy at once and refresh it in the background.
    /// Without a cached copy the caller waits for the network, and a
    /// transport failure is passed through.
    pub async fn stale_while_revalidate(
        &self,
        request: Request,
    ) -> (Result<Response, FetchError>, Option<JoinHandle<()>>) {
        let key = request.cache_key();
        match self.lookup(&key).await {
            Some(cached) => {
                let this = self.clone();
                let handle = tokio::spawn(async move {
                    match this.network.fetch(request).await {
                        Ok(res) => this.store(NamespaceKind::Dynamic, &key, &res).await,
                        Err(err) => debug!(%err, key, "background revalidation failed"),
                    }
                });
                (Ok(cached), Some(handle))
            }
            None => {
                let res = self.network.fetch(request).await;
                if let Ok(res) = &res {
                    self.store(NamespaceKind::Dynamic, &key, res).await;
                }
                (res, None)
            }
        }
    }
}
