use cluster_config::EngineConfig;
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{LockMode, LockName};
use cluster_metadata::{MetadataStore, MetadataTransaction};
use cluster_types::{Cluster, ClusterSet, ClusterSetMember, ClusterSetRole};
use cluster_undo::SharedInstance;
use serde_json::json;
use tracing::instrument;

/// spec §6.1 `createClusterSet`: promotes a standalone Cluster into the
/// PRIMARY of a brand-new ClusterSet. There is no dedicated
/// `cluster_set_members` table in this engine's metadata layer (see
/// `cluster-metadata`'s `DESIGN.md` entry); membership and role are tracked
/// as `clusters.attributes` keys, the same mechanism `set_primary` already
/// uses for its "update ClusterSet role" bookkeeping.
#[instrument(skip_all, fields(cluster = cluster.cluster_id))]
pub async fn create_cluster_set(primary: SharedInstance, cluster: &Cluster, name: &str, engine_cfg: &EngineConfig) -> ClusterResult<ClusterSet> {
    if cluster.clusterset_id.is_some() {
        return Err(ClusterError::UnsupportedClusterType(
            "cluster already belongs to a ClusterSet".to_string(),
        ));
    }

    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let clusterset_id = cluster.cluster_id;
    let mut txn = MetadataTransaction::new();
    let result: ClusterResult<()> = async {
        let mut guard = primary.lock().await;
        guard
            .exec(&format!(
                "UPDATE {}.clusters SET clusterset_id = {clusterset_id} WHERE cluster_id = {}",
                MetadataStore::SCHEMA,
                cluster.cluster_id
            ))
            .await?;
        let mut store = MetadataStore::new(&mut *guard);
        store.set_cluster_attribute(&mut txn, cluster.cluster_id, "clusterset_name", &json!(name)).await?;
        store.set_cluster_attribute(&mut txn, cluster.cluster_id, "clusterset_role", &json!("primary")).await?;
        store
            .set_cluster_attribute(&mut txn, cluster.cluster_id, "clusterset_invalidated", &json!(false))
            .await?;
        store
            .set_cluster_attribute(&mut txn, cluster.cluster_id, "clusterset_view_id_generation", &json!(0u64))
            .await?;
        Ok(())
    }
    .await;
    let _ = txn.commit();

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result?;
    Ok(ClusterSet {
        clusterset_id,
        name: name.to_string(),
        view_id_generation: 0,
        members: vec![ClusterSetMember { cluster_id: cluster.cluster_id, role: ClusterSetRole::Primary, invalidated: false }],
    })
}

/// spec §6.1 `getClusterSet`: reassembles a `ClusterSet` value from each
/// member Cluster's own bookkeeping attributes (written by
/// `create_cluster_set` at creation time and by `set_primary`/
/// `clusterset_failover` afterward).
#[instrument(skip_all)]
pub async fn get_cluster_set(primary: SharedInstance, clusterset_id: u64, member_cluster_ids: &[u64]) -> ClusterResult<ClusterSet> {
    let mut name = None;
    let mut view_id_generation = 0u64;
    let mut members = Vec::with_capacity(member_cluster_ids.len());

    let mut guard = primary.lock().await;
    let mut store = MetadataStore::new(&mut *guard);
    for &cluster_id in member_cluster_ids {
        let role = match store.cluster_attribute(cluster_id, "clusterset_role").await?.and_then(|v| v.as_str().map(str::to_string)) {
            Some(role) if role == "primary" => ClusterSetRole::Primary,
            Some(_) => ClusterSetRole::Replica,
            None => {
                return Err(ClusterError::MetadataInconsistent(format!(
                    "cluster {cluster_id} has no clusterset bookkeeping; it is not part of clusterset {clusterset_id}"
                )));
            }
        };
        let invalidated = store.cluster_attribute(cluster_id, "clusterset_invalidated").await?.and_then(|v| v.as_bool()).unwrap_or(false);
        if let Some(v) = store.cluster_attribute(cluster_id, "clusterset_view_id_generation").await?.and_then(|v| v.as_u64()) {
            view_id_generation = view_id_generation.max(v);
        }
        if name.is_none() {
            name = store.cluster_attribute(cluster_id, "clusterset_name").await?.and_then(|v| v.as_str().map(str::to_string));
        }
        members.push(ClusterSetMember { cluster_id, role, invalidated });
    }

    Ok(ClusterSet {
        clusterset_id,
        name: name.unwrap_or_default(),
        view_id_generation,
        members,
    })
}

#[cfg(test)]
mod tests {
    // Both commands are thin reconstructions over `MetadataStore`'s
    // attribute accessors, which are exercised by `cluster-metadata`'s
    // own test suite; this module is I/O glue.
}
