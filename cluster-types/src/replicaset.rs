use serde::{Deserialize, Serialize};

use crate::Endpoint;

/// A star-topology async member of a ReplicaSet (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaSetMember {
    Primary,
    Secondary,
}

/// An async master-replica topology, the non-GR alternative to Cluster
/// (spec §3.1). Modeled as a star: one PRIMARY, zero or more SECONDARYs,
/// each connected to the PRIMARY via a single dedicated managed channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSet {
    pub replicaset_id: u64,
    pub name: String,
    pub primary_instance_id: u64,
    pub member_instance_ids: Vec<u64>,
}

impl ReplicaSet {
    pub fn secondaries(&self) -> impl Iterator<Item = &u64> {
        self.member_instance_ids
            .iter()
            .filter(move |id| **id != self.primary_instance_id)
    }
}

/// Helper purely for building a managed channel's source list against a
/// ReplicaSet's primary; kept separate from `Endpoint` so callers don't
/// conflate "the channel's source" with "any endpoint".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetSource {
    pub endpoint: Endpoint,
    pub member: ReplicaSetMember,
}
