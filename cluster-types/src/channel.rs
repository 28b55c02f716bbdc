use serde::{Deserialize, Serialize};

use crate::Endpoint;

/// One weighted candidate source in a managed channel's connection-failover
/// list (spec §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub endpoint: Endpoint,
    pub weight: u8,
}

/// An async replication channel with automatic source failover configured
/// (spec §3.1 "Managed channel").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedChannel {
    pub channel_name: String,
    pub sources: Vec<SourceEntry>,
    pub retry_count: u32,
    pub connect_retry_seconds: u32,
    pub account_user: String,
}

impl ManagedChannel {
    /// `k_read_replica_async_channel_name` from spec §3.1.
    pub const READ_REPLICA_CHANNEL: &'static str = "read_replica_channel";
    /// The ClusterSet async channel name used between a REPLICA cluster's
    /// primary and the ClusterSet's global primary.
    pub const CLUSTERSET_CHANNEL: &'static str = "clusterset_replication";

    pub fn primary_source(&self) -> Option<&SourceEntry> {
        self.sources.iter().max_by_key(|s| s.weight)
    }
}
