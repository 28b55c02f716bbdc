use serde::{Deserialize, Serialize};

use crate::Endpoint;

/// How a Read-Replica chooses its effective source (spec §3.1, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicationSourcesPolicy {
    /// Follow the cluster primary.
    Primary,
    /// Prefer a secondary, falling back to the primary if none is ONLINE.
    Secondary,
    /// An ordered, weighted list of candidate endpoints.
    Custom(Vec<WeightedSource>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedSource {
    pub endpoint: Endpoint,
    pub weight: u8,
}

/// A MySQL server that follows a Cluster via a managed async channel, not a
/// GR member (spec §3.1, invariant 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReplica {
    pub instance_id: u64,
    pub cluster_id: u64,
    pub endpoint: Endpoint,
    pub replication_sources: ReplicationSourcesPolicy,
}

impl ReadReplica {
    /// Invariant 7: a CUSTOM source list must reference existing
    /// non-Read-Replica Instances of the same cluster; this only checks
    /// shape (non-empty, no self-reference), existence is checked against
    /// the topology view by the caller.
    pub fn custom_sources(&self) -> Option<&[WeightedSource]> {
        match &self.replication_sources {
            ReplicationSourcesPolicy::Custom(list) => Some(list),
            _ => None,
        }
    }

    pub fn is_custom_source_list_empty(&self) -> bool {
        matches!(&self.replication_sources, ReplicationSourcesPolicy::Custom(list) if list.is_empty())
    }
}
