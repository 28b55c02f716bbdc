use serde::{Deserialize, Serialize};

/// A Cluster's role within a ClusterSet (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterSetRole {
    Primary,
    Replica,
}

/// Membership row for one Cluster within a ClusterSet (spec §6.4
/// `cluster_set_members`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSetMember {
    pub cluster_id: u64,
    pub role: ClusterSetRole,
    /// Set by a failover that promoted a different cluster (invariant 9).
    pub invalidated: bool,
}

/// A set of Clusters connected by async replication (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSet {
    pub clusterset_id: u64,
    pub name: String,
    /// Monotonically increasing; bumped on every failover (spec §4.3).
    pub view_id_generation: u64,
    pub members: Vec<ClusterSetMember>,
}

impl ClusterSet {
    pub fn primary_cluster_id(&self) -> Option<u64> {
        self.members
            .iter()
            .find(|m| m.role == ClusterSetRole::Primary && !m.invalidated)
            .map(|m| m.cluster_id)
    }

    pub fn is_invalidated(&self, cluster_id: u64) -> bool {
        self.members
            .iter()
            .any(|m| m.cluster_id == cluster_id && m.invalidated)
    }

    /// Replica clusters eligible to be a failover candidate: not invalidated,
    /// not already primary (invariant 9).
    pub fn failover_candidates(&self) -> impl Iterator<Item = u64> + '_ {
        self.members
            .iter()
            .filter(|m| m.role == ClusterSetRole::Replica && !m.invalidated)
            .map(|m| m.cluster_id)
    }
}
