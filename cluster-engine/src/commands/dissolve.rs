use cluster_accounts::AccountManager;
use cluster_config::EngineConfig;
use cluster_errors::ClusterResult;
use cluster_instance::{Instance, LockMode, LockName};
use cluster_metadata::MetadataStore;
use cluster_topology::TopologyView;
use cluster_types::{Cluster, InstanceRole};
use cluster_undo::SharedInstance;
use tracing::{info, instrument, warn};

/// spec §6.1/§8: tears down every member of a Cluster — stops GR (or the
/// managed channel, for Read-Replicas) on every reachable instance, drops
/// every recovery account, and deletes the Cluster's Metadata rows. Unlike
/// the other topology commands this has no undo: past the first dropped
/// row there is nothing left to roll back to.
#[instrument(skip_all, fields(cluster = %cluster.name))]
pub async fn dissolve(
    primary: SharedInstance,
    members: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    for member in members.iter_mut() {
        let stop = match view.members.iter().find(|m| m.instance.server_uuid == member.server_uuid) {
            Some(m) if m.instance.role == InstanceRole::Ha => "STOP GROUP_REPLICATION",
            _ => "STOP REPLICA FOR CHANNEL 'read_replica_channel'",
        };
        if let Err(err) = member.exec(stop).await {
            warn!(member = %member.label(), %err, "failed to stop replication on member during dissolve");
        }
    }

    {
        let mut guard = primary.lock().await;
        for row in &view.members {
            if let (Some(user), Some(host)) = (&row.instance.recovery_account_user, &row.instance.recovery_account_host) {
                let account = cluster_types::ReplicationAccount {
                    user: user.clone(),
                    host_pattern: host.clone(),
                    auth_type: cluster_types::AuthType::Password,
                };
                AccountManager::drop_with_snapshot(&mut *guard, &account).await.ok();
            }
        }

        let mut store = MetadataStore::new(&mut *guard);
        let mut txn = cluster_metadata::MetadataTransaction::new();
        for row in &view.members {
            store.remove_instance(&mut txn, &row.instance).await?;
        }
        // The undo log is intentionally discarded: dissolve has no
        // rollback path once any member has been torn down.
        let _ = txn.commit();

        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    info!(cluster = %cluster.name, members = view.members.len(), "cluster dissolved");
    Ok(())
}
