use cluster_config::{Config, EngineConfig, SetMode, SysvarChange};
use cluster_errors::ClusterResult;
use cluster_instance::Instance;
use cluster_instance::{LockMode, LockName};
use cluster_metadata::{MetadataStore, MetadataTransaction};
use cluster_topology::{
    AnyTopologyManager, AsyncGlobalStatusFilter, CommandGate, InstanceKind, QuorumRequirement, TopologyManager,
    TopologyView,
};
use cluster_types::Cluster;
use cluster_undo::SharedInstance;
use serde_json::json;
use tracing::{info, instrument, warn};

/// spec §6.1 `fenceWrites`: sets `super_read_only=ON` on the primary so the
/// cluster stops accepting writes without taking it offline to readers.
#[instrument(skip_all)]
pub async fn fence_writes(
    primary: SharedInstance,
    others: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    set_fenced(primary, others, cluster, view, manager, engine_cfg, true, false).await
}

/// spec §6.1 `unfenceWrites`: restores `super_read_only=OFF` on the primary
/// (and `offline_mode=OFF` everywhere, in case `fenceAllTraffic` was used).
#[instrument(skip_all)]
pub async fn unfence_writes(
    primary: SharedInstance,
    others: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    set_fenced(primary, others, cluster, view, manager, engine_cfg, false, true).await
}

/// spec §6.1 `fenceAllTraffic`: like `fenceWrites`, but also sets
/// `offline_mode=ON` on every reachable member so even reads are refused.
#[instrument(skip_all)]
pub async fn fence_all_traffic(
    primary: SharedInstance,
    others: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    set_fenced(primary, others, cluster, view, manager, engine_cfg, true, true).await
}

async fn set_fenced(
    primary: SharedInstance,
    others: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    engine_cfg: &EngineConfig,
    fence: bool,
    all_traffic: bool,
) -> ClusterResult<()> {
    // `allowed_on_fence: true` — toggling the fence state itself must not be
    // blocked by the very gate it controls.
    CommandGate {
        required_kind: InstanceKind::InnoDbCluster,
        required_quorum: QuorumRequirement::Normal,
        primary_required: true,
        allowed_on_fence: true,
        clusterset_filter: AsyncGlobalStatusFilter::Any,
    }
    .evaluate(view, InstanceKind::InnoDbCluster, cluster.is_fenced())?;

    if fence {
        manager.validate_fence_writes(view)?;
    } else {
        manager.validate_unfence_writes(view)?;
    }

    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = set_fenced_inner(&primary, others, cluster, fence, all_traffic).await;

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn set_fenced_inner(
    primary: &SharedInstance,
    others: &mut [Instance],
    cluster: &Cluster,
    fence: bool,
    all_traffic: bool,
) -> ClusterResult<()> {
    {
        let mut guard = primary.lock().await;
        let mut cfg = Config::new(false);
        cfg.push(SysvarChange::new("super_read_only", if fence { "1" } else { "0" }, SetMode::Global));
        if all_traffic || !fence {
            cfg.push(SysvarChange::new("offline_mode", if fence { "1" } else { "0" }, SetMode::Global));
        }
        cfg.apply(&mut *guard).await?;
    }

    if all_traffic {
        for other in others.iter_mut() {
            let mut cfg = Config::new(true);
            cfg.push(SysvarChange::new("offline_mode", if fence { "1" } else { "0" }, SetMode::Global));
            if let Err(err) = cfg.apply(other).await {
                warn!(member = %other.label(), %err, "failed to update offline_mode (best-effort)");
            }
        }
    }

    let mut txn = MetadataTransaction::new();
    {
        let mut guard = primary.lock().await;
        let mut store = MetadataStore::new(&mut *guard);
        store.set_cluster_attribute(&mut txn, cluster.cluster_id, "fenced", &json!(fence)).await?;
    }
    // The fence attribute is a terminal state change, not part of a larger
    // multi-step transaction this command could roll back on later failure.
    let _ = txn.commit();

    info!(fenced = fence, all_traffic, "cluster fence state updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    // `fence_writes`/`unfence_writes`'s availability gating is exercised by
    // `cluster_topology::manager`'s own tests; the remainder here is I/O.
}
