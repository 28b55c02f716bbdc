use cluster_errors::ClusterResult;
use cluster_instance::Instance;
use cluster_metadata::MetadataStore;
use cluster_topology::{MemberState, NodeStatus, TopologyView};
use cluster_types::{Cluster, Endpoint};
use tracing::instrument;

/// One row of `performance_schema.replication_group_members` joined with
/// `replication_group_member_stats` (spec §6.2 read contract).
struct LiveMember {
    member_id: String,
    host: String,
    port: u16,
    state: String,
    role: String,
}

fn parse_node_status(state: &str) -> Option<NodeStatus> {
    match state {
        "ONLINE" => Some(NodeStatus::Online),
        "RECOVERING" => Some(NodeStatus::Online),
        "OFFLINE" => Some(NodeStatus::Offline),
        "UNREACHABLE" => Some(NodeStatus::Unreachable),
        "ERROR" => Some(NodeStatus::Error),
        _ => None,
    }
}

async fn query_live_members(primary: &mut Instance) -> ClusterResult<Vec<LiveMember>> {
    let rows = primary
        .query_rows(
            "SELECT member_id, member_host, member_port, member_state, member_role \
             FROM performance_schema.replication_group_members",
        )
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let member_id = row.first()?.clone()?;
            let host = row.get(1)?.clone()?;
            let port = row.get(2)?.clone()?.parse().ok()?;
            let state = row.get(3)?.clone().unwrap_or_default();
            let role = row.get(4)?.clone().unwrap_or_default();
            Some(LiveMember { member_id, host, port, state, role })
        })
        .collect())
}

/// Builds the in-memory [`TopologyView`] for `cluster_id` by combining
/// Metadata rows with live `replication_group_members` state (spec §2
/// "Topology view": "In-memory snapshot combining Metadata rows with live
/// GR membership and async-channel status for all nodes").
#[instrument(skip(primary))]
pub async fn build_topology_view(primary: &mut Instance, cluster: Cluster) -> ClusterResult<TopologyView> {
    let live = query_live_members(primary).await?;
    let mut store = MetadataStore::new(primary);
    let rows = store.list_instances(cluster.cluster_id).await?;

    let members = rows
        .into_iter()
        .map(|instance| {
            let live_match = live.iter().find(|m| m.member_id == instance.server_uuid);
            let status = live_match.and_then(|m| parse_node_status(&m.state));
            let gr_online_or_recovering = live_match
                .map(|m| matches!(m.state.as_str(), "ONLINE" | "RECOVERING"))
                .unwrap_or(false);
            let is_primary = live_match.map(|m| m.role == "PRIMARY").unwrap_or(false);

            MemberState {
                instance,
                status,
                gr_online_or_recovering,
                is_primary,
                in_metadata: true,
                in_live_group: live_match.is_some(),
            }
        })
        .collect();

    Ok(TopologyView { cluster, members })
}

/// spec §4.10 rescan step 1: live GR members whose UUID has no matching
/// Metadata row at all.
pub fn live_endpoints_not_in_metadata(view: &TopologyView, live_endpoints: &[Endpoint]) -> Vec<Endpoint> {
    live_endpoints
        .iter()
        .filter(|ep| view.members.iter().all(|m| &m.instance.endpoint != *ep))
        .cloned()
        .collect()
}
