//! Caching interception layer.
//!
//! - `fetch`: request/response types, the `Fetch` seam and the reqwest
//!   network transport.
//! - `namespace`: versioned namespace names and stale detection.
//! - `strategy`: resource classification and the caching strategies.
//! - `worker`: the worker task, its lifecycle and `WorkerHandle`.

pub mod fetch;
pub mod namespace;
pub mod strategy;
pub mod worker;

pub use fetch::{Fetch, FetchError, Method, NetworkFetcher, Request, Response, ResponseSource};
pub use namespace::{NamespaceKind, Namespaces};
pub use strategy::{Classifier, ResourceClass};
pub use worker::{InstallReport, Phase, Worker, WorkerConfig, WorkerHandle};
