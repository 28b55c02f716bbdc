use cluster_config::EngineConfig;
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{Instance, LockMode, LockName};
use cluster_topology::{AnyTopologyManager, TopologyManager, TopologyView};
use cluster_types::Cluster;
use cluster_undo::SharedInstance;
use tracing::{info, instrument, warn};

/// spec §4.1/§4.3 `force_quorum_using_partition_of`: reconfigures
/// `group_replication_force_members` on the surviving partition so GR
/// recomputes quorum from only the members still online/recovering,
/// dropping members the caller has judged unreachable.
#[instrument(skip_all)]
pub async fn force_quorum_using_partition_of(
    primary: SharedInstance,
    partition: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    manager.validate_force_primary(view)?;

    if partition.is_empty() {
        return Err(ClusterError::BadArg("force_quorum requires at least one reachable instance".to_string()));
    }

    let surviving_addresses: Vec<String> = view
        .members
        .iter()
        .filter(|m| m.gr_online_or_recovering)
        .filter_map(|m| m.instance.gr_local_address.as_ref())
        .map(|ep| ep.to_string())
        .collect();

    if surviving_addresses.is_empty() {
        return Err(ClusterError::MetadataInconsistent(
            "no surviving member reports a group_replication_local_address".to_string(),
        ));
    }

    let force_members = surviving_addresses.join(",");
    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = force_quorum_inner(partition, &force_members, view).await;

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn force_quorum_inner(partition: &mut [Instance], force_members: &str, view: &TopologyView) -> ClusterResult<()> {
    let any = partition
        .first_mut()
        .ok_or_else(|| ClusterError::BadArg("force_quorum requires at least one reachable instance".to_string()))?;

    any.exec(&format!(
        "SET GLOBAL group_replication_force_members = '{force_members}'"
    ))
    .await?;
    info!(%force_members, "quorum forced on surviving partition");

    any.exec("SET GLOBAL group_replication_force_members = ''").await?;

    for member in partition.iter_mut() {
        let not_online = view
            .members
            .iter()
            .find(|m| m.instance.server_uuid == member.server_uuid)
            .map(|m| !m.is_online())
            .unwrap_or(false);
        if not_online {
            if let Err(err) = member.exec("STOP GROUP_REPLICATION").await {
                warn!(member = %member.label(), %err, "failed to stop group_replication on a non-recovered member");
            }
        }
    }

    Ok(())
}
