use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Primary-election mode of a Cluster (spec §3.1, invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyMode {
    SinglePrimary,
    MultiPrimary,
}

/// GR's transport choice (spec GLOSSARY "Communication stack").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommStack {
    Xcom,
    Mysql,
}

/// Availability states from spec §4.1's transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterAvailability {
    Online,
    OnlineNoPrimary,
    Offline,
    NoQuorum,
    SomeUnreachable,
    Unreachable,
}

impl ClusterAvailability {
    /// Whether the cluster currently has GR quorum.
    pub fn has_quorum(&self) -> bool {
        matches!(
            self,
            ClusterAvailability::Online
                | ClusterAvailability::OnlineNoPrimary
                | ClusterAvailability::SomeUnreachable
        )
    }
}

/// A GR group (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: u64,
    pub name: String,
    /// The GR group UUID, equal to `group_replication_group_name` on every
    /// reachable member (invariant 1).
    pub group_name: String,
    pub topology_mode: TopologyMode,
    /// Present once `group_replication_view_change_uuid` has been set
    /// (invariant 5).
    pub view_change_uuid: Option<String>,
    pub comm_stack: CommStack,
    /// Non-`None` when this Cluster is a member of a ClusterSet.
    pub clusterset_id: Option<u64>,
    pub availability: ClusterAvailability,
    /// Free-form cluster attributes (spec §6.4): `disable_clone`,
    /// `assume_gtid_set_complete`, `manual_start_on_boot`,
    /// `replication_allowed_host`, `transaction_size_limit`, etc.
    pub attributes: Json,
}

impl Cluster {
    pub fn attribute(&self, key: &str) -> Option<&Json> {
        self.attributes.get(key)
    }

    pub fn assume_gtid_set_complete(&self) -> bool {
        self.attribute("assume_gtid_set_complete")
            .and_then(Json::as_bool)
            .unwrap_or(false)
    }

    pub fn transaction_size_limit(&self) -> i64 {
        self.attribute("transaction_size_limit")
            .and_then(Json::as_i64)
            .unwrap_or(0)
    }

    pub fn is_replica_in_clusterset(&self, role: Option<super::ClusterSetRole>) -> bool {
        self.clusterset_id.is_some() && matches!(role, Some(super::ClusterSetRole::Replica))
    }

    /// spec §4.1: whether write fencing (`fenceWrites`/`fenceAllTraffic`) is
    /// currently active on this cluster.
    pub fn is_fenced(&self) -> bool {
        self.attribute("fenced").and_then(Json::as_bool).unwrap_or(false)
    }
}
