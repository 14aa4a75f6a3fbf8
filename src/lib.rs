pub mod config;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod events;
pub mod intercept;
pub mod model;
pub mod outbox;
pub mod remote;
pub mod state;

pub use engine::{SyncEngine, SyncSummary};
