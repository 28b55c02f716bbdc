use cluster_errors::{ClusterError, ClusterResult};
use cluster_types::ClusterAvailability;

use crate::view::TopologyView;

/// Operations gated by the availability-transition table (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Rejoin,
    Remove,
    SetPrimary,
    FenceWrites,
    UnfenceWrites,
    Failover,
    Rescan,
}

/// The shared validation contract for both topology flavors (spec §9:
/// "implementations are selected by cluster type and never mix within a
/// single command"). Each method answers whether `op` is currently allowed
/// against `view`, per the fixed availability-transition table in spec §4.1.
pub trait TopologyManager {
    fn validate_add(&self, view: &TopologyView) -> ClusterResult<()>;
    fn validate_rejoin(&self, view: &TopologyView) -> ClusterResult<()>;
    fn validate_remove(&self, view: &TopologyView, force: bool) -> ClusterResult<()>;
    fn validate_switch_primary(&self, view: &TopologyView) -> ClusterResult<()>;
    fn validate_force_primary(&self, view: &TopologyView) -> ClusterResult<()>;
    /// spec §4.1: fencing is only allowed while the cluster is fully ONLINE
    /// (quorum and primary both present).
    fn validate_fence_writes(&self, view: &TopologyView) -> ClusterResult<()>;
    fn validate_unfence_writes(&self, view: &TopologyView) -> ClusterResult<()>;
}

fn disallowed(op: Operation, availability: ClusterAvailability) -> ClusterError {
    ClusterError::UnsupportedClusterType(format!(
        "{op:?} is not allowed while the cluster is {availability:?}"
    ))
}

/// Group Replication topology manager: enforces the table row-by-row as
/// written in spec §4.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrTopologyManager;

impl TopologyManager for GrTopologyManager {
    fn validate_add(&self, view: &TopologyView) -> ClusterResult<()> {
        match view.derive_availability() {
            ClusterAvailability::Online | ClusterAvailability::SomeUnreachable => Ok(()),
            ClusterAvailability::Offline => Err(ClusterError::UnsupportedClusterType(
                "add is only possible via reboot-from-complete-outage while OFFLINE".to_string(),
            )),
            other => Err(disallowed(Operation::Add, other)),
        }
    }

    fn validate_rejoin(&self, view: &TopologyView) -> ClusterResult<()> {
        match view.derive_availability() {
            ClusterAvailability::Online | ClusterAvailability::SomeUnreachable => Ok(()),
            ClusterAvailability::Offline => Err(ClusterError::UnsupportedClusterType(
                "rejoin is only possible via reboot-from-complete-outage while OFFLINE".to_string(),
            )),
            other => Err(disallowed(Operation::Rejoin, other)),
        }
    }

    fn validate_remove(&self, view: &TopologyView, force: bool) -> ClusterResult<()> {
        match view.derive_availability() {
            ClusterAvailability::Online | ClusterAvailability::SomeUnreachable => Ok(()),
            ClusterAvailability::Unreachable if force => Ok(()),
            other => Err(disallowed(Operation::Remove, other)),
        }
    }

    fn validate_switch_primary(&self, view: &TopologyView) -> ClusterResult<()> {
        match view.derive_availability() {
            ClusterAvailability::Online => {
                if view.online_or_recovering_count() == view.members.len() {
                    Ok(())
                } else {
                    Err(ClusterError::UnsupportedClusterType(
                        "set_primary requires every member to be ONLINE".to_string(),
                    ))
                }
            }
            ClusterAvailability::OnlineNoPrimary => Ok(()),
            other => Err(disallowed(Operation::SetPrimary, other)),
        }
    }

    fn validate_force_primary(&self, view: &TopologyView) -> ClusterResult<()> {
        match view.derive_availability() {
            ClusterAvailability::NoQuorum => Ok(()),
            other => Err(disallowed(Operation::Failover, other)),
        }
    }

    fn validate_fence_writes(&self, view: &TopologyView) -> ClusterResult<()> {
        match view.derive_availability() {
            ClusterAvailability::Online => Ok(()),
            other => Err(disallowed(Operation::FenceWrites, other)),
        }
    }

    fn validate_unfence_writes(&self, view: &TopologyView) -> ClusterResult<()> {
        match view.derive_availability() {
            ClusterAvailability::Online => Ok(()),
            other => Err(disallowed(Operation::UnfenceWrites, other)),
        }
    }
}

/// Star-async (ClusterSet / Read-Replica) topology manager: the same
/// contract applied to replicas that never hold GR quorum of their own.
/// Membership changes always flow through the PRIMARY cluster, so `add` and
/// `rejoin` delegate to whatever availability the PRIMARY cluster reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct StarAsyncTopologyManager;

impl TopologyManager for StarAsyncTopologyManager {
    fn validate_add(&self, view: &TopologyView) -> ClusterResult<()> {
        GrTopologyManager.validate_add(view)
    }

    fn validate_rejoin(&self, view: &TopologyView) -> ClusterResult<()> {
        GrTopologyManager.validate_rejoin(view)
    }

    fn validate_remove(&self, view: &TopologyView, force: bool) -> ClusterResult<()> {
        GrTopologyManager.validate_remove(view, force)
    }

    fn validate_switch_primary(&self, view: &TopologyView) -> ClusterResult<()> {
        Err(ClusterError::UnsupportedClusterType(
            "set_primary does not apply to a star-async replica; use failover instead".to_string(),
        ))
    }

    fn validate_force_primary(&self, view: &TopologyView) -> ClusterResult<()> {
        GrTopologyManager.validate_force_primary(view)
    }

    fn validate_fence_writes(&self, view: &TopologyView) -> ClusterResult<()> {
        GrTopologyManager.validate_fence_writes(view)
    }

    fn validate_unfence_writes(&self, view: &TopologyView) -> ClusterResult<()> {
        GrTopologyManager.validate_unfence_writes(view)
    }
}

/// Command-boundary selector (spec §9: "Prefer a tagged variant at the
/// command boundary rather than deep inheritance"). Command executors hold
/// one of these, chosen once by cluster type, and never branch on it again
/// past this call site.
#[derive(Debug, Clone, Copy)]
pub enum AnyTopologyManager {
    Gr(GrTopologyManager),
    StarAsync(StarAsyncTopologyManager),
}

impl AnyTopologyManager {
    pub fn for_cluster(in_clusterset: bool) -> Self {
        if in_clusterset {
            AnyTopologyManager::StarAsync(StarAsyncTopologyManager)
        } else {
            AnyTopologyManager::Gr(GrTopologyManager)
        }
    }
}

impl TopologyManager for AnyTopologyManager {
    fn validate_add(&self, view: &TopologyView) -> ClusterResult<()> {
        match self {
            AnyTopologyManager::Gr(m) => m.validate_add(view),
            AnyTopologyManager::StarAsync(m) => m.validate_add(view),
        }
    }

    fn validate_rejoin(&self, view: &TopologyView) -> ClusterResult<()> {
        match self {
            AnyTopologyManager::Gr(m) => m.validate_rejoin(view),
            AnyTopologyManager::StarAsync(m) => m.validate_rejoin(view),
        }
    }

    fn validate_remove(&self, view: &TopologyView, force: bool) -> ClusterResult<()> {
        match self {
            AnyTopologyManager::Gr(m) => m.validate_remove(view, force),
            AnyTopologyManager::StarAsync(m) => m.validate_remove(view, force),
        }
    }

    fn validate_switch_primary(&self, view: &TopologyView) -> ClusterResult<()> {
        match self {
            AnyTopologyManager::Gr(m) => m.validate_switch_primary(view),
            AnyTopologyManager::StarAsync(m) => m.validate_switch_primary(view),
        }
    }

    fn validate_force_primary(&self, view: &TopologyView) -> ClusterResult<()> {
        match self {
            AnyTopologyManager::Gr(m) => m.validate_force_primary(view),
            AnyTopologyManager::StarAsync(m) => m.validate_force_primary(view),
        }
    }

    fn validate_fence_writes(&self, view: &TopologyView) -> ClusterResult<()> {
        match self {
            AnyTopologyManager::Gr(m) => m.validate_fence_writes(view),
            AnyTopologyManager::StarAsync(m) => m.validate_fence_writes(view),
        }
    }

    fn validate_unfence_writes(&self, view: &TopologyView) -> ClusterResult<()> {
        match self {
            AnyTopologyManager::Gr(m) => m.validate_unfence_writes(view),
            AnyTopologyManager::StarAsync(m) => m.validate_unfence_writes(view),
        }
    }
}

#[cfg(test)]
mod tests {
    use cluster_types::{Cluster, ClusterAvailability as Avail, CommStack, Endpoint, Instance, InstanceRole, TopologyMode};
    use serde_json::json;

    use super::*;
    use crate::node_status::NodeStatus;
    use crate::view::MemberState;

    fn cluster() -> Cluster {
        Cluster {
            cluster_id: 1,
            name: "c1".into(),
            group_name: "grp".into(),
            topology_mode: TopologyMode::SinglePrimary,
            view_change_uuid: None,
            comm_stack: CommStack::Xcom,
            clusterset_id: None,
            availability: Avail::Online,
            attributes: json!({}),
        }
    }

    fn member(id: u64, online: bool, primary: bool) -> MemberState {
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
            in_live_group: true,
        }
    }

    fn view(members: Vec<MemberState>) -> TopologyView {
        TopologyView { cluster: cluster(), members }
    }

    #[test]
    fn online_allows_add_rejoin_remove_set_primary() {
        let v = view(vec![member(1, true, true), member(2, true, false), member(3, true, false)]);
        let m = GrTopologyManager;
        assert!(m.validate_add(&v).is_ok());
        assert!(m.validate_rejoin(&v).is_ok());
        assert!(m.validate_remove(&v, false).is_ok());
        assert!(m.validate_switch_primary(&v).is_ok());
    }

    #[test]
    fn no_quorum_only_allows_force_primary() {
        let v = view(vec![member(1, true, true), member(2, false, false), member(3, false, false)]);
        let m = GrTopologyManager;
        assert!(m.validate_add(&v).is_err());
        assert!(m.validate_rejoin(&v).is_err());
        assert!(m.validate_remove(&v, false).is_err());
        assert!(m.validate_force_primary(&v).is_ok());
    }

    #[test]
    fn unreachable_allows_only_forced_remove() {
        let v = view(vec![member(1, false, false), member(2, false, false)]);
        let m = GrTopologyManager;
        assert!(matches!(v.derive_availability(), Avail::Unreachable));
        assert!(m.validate_remove(&v, false).is_err());
        assert!(m.validate_remove(&v, true).is_ok());
    }

    #[test]
    fn online_no_primary_only_allows_set_primary() {
        let v = view(vec![member(1, true, false), member(2, true, false), member(3, false, false)]);
        assert_eq!(v.derive_availability(), Avail::OnlineNoPrimary);
        let m = GrTopologyManager;
        assert!(m.validate_add(&v).is_err());
        assert!(m.validate_switch_primary(&v).is_ok());
    }

    #[test]
    fn star_async_rejects_set_primary() {
        let v = view(vec![member(1, true, true), member(2, true, false)]);
        let m = StarAsyncTopologyManager;
        assert!(m.validate_switch_primary(&v).is_err());
    }

    #[test]
    fn fence_writes_only_allowed_fully_online() {
        let online = view(vec![member(1, true, true), member(2, true, false), member(3, true, false)]);
        let no_primary = view(vec![member(1, true, false), member(2, true, false), member(3, false, false)]);
        let m = GrTopologyManager;
        assert!(m.validate_fence_writes(&online).is_ok());
        assert!(m.validate_unfence_writes(&online).is_ok());
        assert!(m.validate_fence_writes(&no_primary).is_err());
        assert!(m.validate_unfence_writes(&no_primary).is_err());
    }

    #[test]
    fn tagged_variant_dispatches_by_cluster_kind() {
        let v = view(vec![member(1, true, true), member(2, true, false)]);
        let gr = AnyTopologyManager::for_cluster(false);
        let star = AnyTopologyManager::for_cluster(true);
        assert!(gr.validate_switch_primary(&v).is_ok());
        assert!(star.validate_switch_primary(&v).is_err());
    }
}
