use crate::connectivity::Connectivity;
use crate::model::{BatchReport, QueueCounts};

/// Notifications published by the engine for front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ConnectivityChanged(Connectivity),
    QueueCountsChanged(QueueCounts),
    BatchCompleted(BatchReport),
    /// A refresh from the remote authority replaced the confirmed records.
    Refreshed { records: usize },
}
