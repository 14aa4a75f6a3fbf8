use crate::intercept::fetch::{Fetch, Request};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

/// Two-state connectivity tracker. State only changes through `set`, which
/// the host calls on platform signals; remote call failures never flip it.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    /// Apply a platform signal. Returns the previous state when this was a
    /// real transition, `None` when the state was already `next`.
    pub fn set(&self, next: Connectivity) -> Option<Connectivity> {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            previous = Some(*state);
            *state = next;
            true
        });
        previous
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

/// Derive a platform signal from one request to `url`. Any HTTP answer
/// counts as reachable; a transport failure or synthesized fallback does not.
pub async fn reachability(network: &dyn Fetch, url: &Url) -> Connectivity {
    match network.fetch(Request::get(url.clone())).await {
        Ok(res) => Connectivity::from_online(!res.is_offline_fallback()),
        Err(err) => {
            debug!(error = %err, %url, "remote unreachable");
            Connectivity::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::fetch::{FetchError, Response, ResponseSource};
    use async_trait::async_trait;

    struct FixedNetwork(Result<Response, FetchError>);

    #[async_trait]
    impl Fetch for FixedNetwork {
        async fn fetch(&self, _request: Request) -> Result<Response, FetchError> {
            self.0.clone()
        }
    }

    fn answer(status: u16, source: ResponseSource) -> Result<Response, FetchError> {
        Ok(Response {
            status,
            content_type: None,
            body: Vec::new(),
            source,
        })
    }

    #[tokio::test]
    async fn any_http_answer_counts_as_online() {
        let url = Url::parse("http://remote.test/").unwrap();
        let not_found = FixedNetwork(answer(404, ResponseSource::Network));
        assert_eq!(reachability(&not_found, &url).await, Connectivity::Online);

        let refused = FixedNetwork(Err(FetchError::Transport("connection refused".into())));
        assert_eq!(reachability(&refused, &url).await, Connectivity::Offline);

        let fallback = FixedNetwork(answer(503, ResponseSource::Fallback));
        assert_eq!(reachability(&fallback, &url).await, Connectivity::Offline);
    }

    #[tokio::test]
    async fn only_real_transitions_notify() {
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let mut rx = monitor.subscribe();

        assert_eq!(monitor.set(Connectivity::Offline), None);
        assert!(!rx.has_changed().unwrap());

        assert_eq!(monitor.set(Connectivity::Online), Some(Connectivity::Offline));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
        assert!(monitor.current().is_online());
    }
}
