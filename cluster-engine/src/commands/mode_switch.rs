use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{LockMode, LockName};
use cluster_metadata::MetadataStore;
use cluster_topology::{
    AnyTopologyManager, AsyncGlobalStatusFilter, CommandGate, InstanceKind, QuorumRequirement, TopologyManager,
    TopologyView,
};
use cluster_types::{Cluster, TopologyMode};
use cluster_undo::SharedInstance;
use tracing::{info, instrument};

use cluster_config::EngineConfig;

/// spec §6.1 `switchToSinglePrimaryMode`: switches a MULTI_PRIMARY GR group
/// to SINGLE_PRIMARY, electing `new_primary` if given or letting GR pick.
#[instrument(skip_all)]
pub async fn switch_to_single_primary_mode(
    primary: SharedInstance,
    new_primary_uuid: Option<&str>,
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    switch_mode(primary, cluster, view, manager, engine_cfg, TopologyMode::SinglePrimary, new_primary_uuid).await
}

/// spec §6.1 `switchToMultiPrimaryMode`: switches a SINGLE_PRIMARY GR group
/// to MULTI_PRIMARY, making every ONLINE member a writer.
#[instrument(skip_all)]
pub async fn switch_to_multi_primary_mode(
    primary: SharedInstance,
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    switch_mode(primary, cluster, view, manager, engine_cfg, TopologyMode::MultiPrimary, None).await
}

async fn switch_mode(
    primary: SharedInstance,
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
    target_mode: TopologyMode,
    new_primary_uuid: Option<&str>,
) -> ClusterResult<()> {
    if cluster.topology_mode == target_mode {
        return Err(ClusterError::UnsupportedClusterType(format!(
            "cluster is already {target_mode:?}"
        )));
    }

    CommandGate {
        required_kind: InstanceKind::InnoDbCluster,
        required_quorum: QuorumRequirement::Normal,
        primary_required: false,
        allowed_on_fence: false,
        clusterset_filter: AsyncGlobalStatusFilter::Any,
    }
    .evaluate(view, InstanceKind::InnoDbCluster, cluster.is_fenced())?;
    // Reuses `set_primary`'s gate: a mode switch needs every member ONLINE,
    // the same requirement GR imposes on primary election. Star-async
    // replicasets correctly fall outside this — they have no GR mode to flip.
    manager.validate_switch_primary(view)?;

    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = switch_mode_inner(&primary, cluster, target_mode, new_primary_uuid).await;

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn switch_mode_inner(
    primary: &SharedInstance,
    cluster: &Cluster,
    target_mode: TopologyMode,
    new_primary_uuid: Option<&str>,
) -> ClusterResult<()> {
    let mut guard = primary.lock().await;
    match target_mode {
        TopologyMode::SinglePrimary => {
            let stmt = match new_primary_uuid {
                Some(uuid) => format!("SELECT group_replication_switch_to_single_primary_mode('{uuid}')"),
                None => "SELECT group_replication_switch_to_single_primary_mode()".to_string(),
            };
            guard.exec(&stmt).await?;
        }
        TopologyMode::MultiPrimary => {
            guard.exec("SELECT group_replication_switch_to_multi_primary_mode()").await?;
        }
    }

    let mode_str = match target_mode {
        TopologyMode::SinglePrimary => "SINGLE_PRIMARY",
        TopologyMode::MultiPrimary => "MULTI_PRIMARY",
    };
    guard
        .exec(&format!(
            "UPDATE {}.clusters SET topology_mode = '{mode_str}' WHERE cluster_id = {}",
            MetadataStore::SCHEMA,
            cluster.cluster_id
        ))
        .await?;

    info!(?target_mode, "group replication mode switched");
    Ok(())
}

#[cfg(test)]
mod tests {
    // Gating is exercised by `cluster_topology::manager`'s own
    // `validate_switch_primary` tests; the remainder here is I/O.
}
