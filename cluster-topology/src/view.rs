use cluster_types::{Cluster, ClusterAvailability, Endpoint, Instance};

use crate::node_status::NodeStatus;

/// Live GR/async state for one Metadata Instance row (spec §2 "Topology
/// view"). The view itself is an immutable snapshot, valid only for the
/// lifetime of the command that built it (spec §9 "Cycles and
/// back-references").
#[derive(Debug, Clone)]
pub struct MemberState {
    pub instance: Instance,
    pub status: Option<NodeStatus>,
    /// Whether GR reports this member ONLINE/RECOVERING right now; distinct
    /// from `status` which additionally folds in replication/consistency
    /// errors observed on its channel.
    pub gr_online_or_recovering: bool,
    pub is_primary: bool,
    /// A live GR member not present in the Metadata at all, or a Metadata
    /// row not present in the live group (spec §4.10 rescan).
    pub in_metadata: bool,
    pub in_live_group: bool,
}

impl MemberState {
    pub fn is_online(&self) -> bool {
        matches!(self.status, Some(NodeStatus::Online))
    }
}

/// In-memory snapshot combining Metadata rows with live GR membership and
/// async-channel status for all nodes (spec §2).
#[derive(Debug, Clone)]
pub struct TopologyView {
    pub cluster: Cluster,
    pub members: Vec<MemberState>,
}

impl TopologyView {
    pub fn primary(&self) -> Option<&MemberState> {
        self.members.iter().find(|m| m.is_primary)
    }

    pub fn member_by_endpoint(&self, endpoint: &Endpoint) -> Option<&MemberState> {
        self.members.iter().find(|m| &m.instance.endpoint == endpoint)
    }

    pub fn online_members(&self) -> impl Iterator<Item = &MemberState> {
        self.members.iter().filter(|m| m.is_online())
    }

    pub fn online_or_recovering_count(&self) -> usize {
        self.members.iter().filter(|m| m.gr_online_or_recovering).count()
    }

    pub fn reachable_count(&self) -> usize {
        self.members.iter().filter(|m| m.status != Some(NodeStatus::Unreachable)).count()
    }

    /// Derives the cluster's overall availability from member states,
    /// using the same classification spec §4.1's transition table keys on.
    pub fn derive_availability(&self) -> ClusterAvailability {
        if self.members.is_empty() {
            return ClusterAvailability::Offline;
        }

        let unreachable = self
            .members
            .iter()
            .filter(|m| m.status == Some(NodeStatus::Unreachable))
            .count();

        if unreachable == self.members.len() {
            return ClusterAvailability::Unreachable;
        }

        let online_or_recovering = self.online_or_recovering_count();
        let has_quorum = online_or_recovering * 2 > self.members.len();

        if !has_quorum {
            return ClusterAvailability::NoQuorum;
        }

        if unreachable > 0 {
            return ClusterAvailability::SomeUnreachable;
        }

        if self.primary().is_some() {
            ClusterAvailability::Online
        } else {
            ClusterAvailability::OnlineNoPrimary
        }
    }

    /// spec §4.10 rescan step 1: diff Metadata against live GR membership
    /// by server UUID and by endpoint.
    pub fn newly_discovered(&self) -> impl Iterator<Item = &MemberState> {
        self.members.iter().filter(|m| m.in_live_group && !m.in_metadata)
    }

    pub fn unavailable(&self) -> impl Iterator<Item = &MemberState> {
        self.members
            .iter()
            .filter(|m| m.in_metadata && !m.in_live_group)
    }
}

#[cfg(test)]
mod tests {
    use cluster_types::{ClusterAvailability, CommStack, InstanceRole, TopologyMode};
    use serde_json::json;

    use super::*;

    fn cluster() -> Cluster {
        Cluster {
            cluster_id: 1,
            name: "c1".into(),
            group_name: "grp".into(),
            topology_mode: TopologyMode::SinglePrimary,
            view_change_uuid: None,
            comm_stack: CommStack::Xcom,
            clusterset_id: None,
            availability: ClusterAvailability::Online,
            attributes: json!({}),
        }
    }

    fn member(id: u64, online: bool, primary: bool, in_group: bool) -> MemberState {
        MemberState {
            instance: Instance {
                instance_id: id,
                cluster_id: 1,
                server_uuid: format!("uuid-{id}"),
                server_id: id as u32,
                endpoint: Endpoint::new(format!("h{id}"), 3306),
                x_endpoint: None,
                gr_local_address: None,
                label: format!("h{id}:3306"),
                role: InstanceRole::Ha,
                hidden_from_router: false,
                recovery_account_user: None,
                recovery_account_host: None,
            },
            status: Some(if online { NodeStatus::Online } else { NodeStatus::Unreachable }),
            gr_online_or_recovering: online,
            is_primary: primary,
            in_metadata: true,
            in_live_group: in_group,
        }
    }

    #[test]
    fn three_online_members_with_primary_is_online() {
        let view = TopologyView {
            cluster: cluster(),
            members: vec![member(1, true, true, true), member(2, true, false, true), member(3, true, false, true)],
        };
        assert_eq!(view.derive_availability(), ClusterAvailability::Online);
    }

    #[test]
    fn minority_online_has_no_quorum() {
        let view = TopologyView {
            cluster: cluster(),
            members: vec![member(1, true, true, true), member(2, false, false, true), member(3, false, false, true)],
        };
        assert_eq!(view.derive_availability(), ClusterAvailability::NoQuorum);
    }

    #[test]
    fn quorum_without_primary_is_online_no_primary() {
        let view = TopologyView {
            cluster: cluster(),
            members: vec![member(1, true, false, true), member(2, true, false, true), member(3, false, false, true)],
        };
        assert_eq!(view.derive_availability(), ClusterAvailability::OnlineNoPrimary);
    }
}
