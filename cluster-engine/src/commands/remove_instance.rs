use std::time::Duration;

use cluster_accounts::AccountManager;
use cluster_channel::{ChannelConfigurator, MemberView};
use cluster_config::{Config, EngineConfig, SetMode, SysvarChange};
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{Instance, LockMode, LockName};
use cluster_metadata::{MetadataStore, MetadataTransaction};
use cluster_topology::{
    AnyTopologyManager, AsyncGlobalStatusFilter, CommandGate, InstanceKind, QuorumRequirement, TopologyManager,
    TopologyView,
};
use cluster_types::{Cluster, Endpoint, InstanceRole, ManagedChannel, ReplicationSourcesPolicy};
use cluster_undo::{SharedInstance, UndoTracker};
use tracing::{info, instrument, warn};

use crate::pure;

pub struct RemoveInstanceOptions {
    pub force: bool,
    pub gtid_sync_timeout_secs: u64,
}

/// spec §4.3 `remove_instance`: stop GR on a reachable target, sync it with
/// the primary, drop its recovery account, delete its Metadata row, and
/// rebalance group seeds / auto_increment on the remaining members.
#[instrument(skip_all, fields(target = %target_endpoint))]
pub async fn remove_instance(
    primary: SharedInstance,
    target: Option<&mut Instance>,
    target_endpoint: &Endpoint,
    others: &mut [Instance],
    read_replicas: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    options: &RemoveInstanceOptions,
    engine_cfg: &EngineConfig,
    undo: &mut UndoTracker,
) -> ClusterResult<()> {
    let removed_row = view
        .member_by_endpoint(target_endpoint)
        .map(|m| m.instance.clone())
        .ok_or_else(|| ClusterError::MetadataMissing(format!("instance '{target_endpoint}' not in this cluster")))?;

    if view.members.len() == 1 {
        return Err(ClusterError::UnsupportedClusterType(
            "removeInstance refuses on the last remaining member; use dissolve instead".to_string(),
        ));
    }

    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    let instance_lock = LockName::Instance { instance_id: removed_row.instance_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &instance_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = remove_instance_inner(
        primary.clone(),
        target,
        &removed_row,
        others,
        read_replicas,
        cluster,
        view,
        manager,
        options,
        engine_cfg,
        undo,
    )
    .await;

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn remove_instance_inner(
    primary: SharedInstance,
    mut target: Option<&mut Instance>,
    removed_row: &cluster_types::Instance,
    others: &mut [Instance],
    read_replicas: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    options: &RemoveInstanceOptions,
    engine_cfg: &EngineConfig,
    undo: &mut UndoTracker,
) -> ClusterResult<()> {
    CommandGate {
        required_kind: InstanceKind::InnoDbCluster,
        required_quorum: QuorumRequirement::Normal,
        primary_required: false,
        allowed_on_fence: false,
        clusterset_filter: AsyncGlobalStatusFilter::Any,
    }
    .evaluate(view, InstanceKind::InnoDbCluster, cluster.is_fenced())?;
    manager.validate_remove(view, options.force)?;

    if removed_row.role == InstanceRole::Ha {
        if let Some(target) = target.as_deref_mut() {
            sync_with_primary(&primary, target, Duration::from_secs(options.gtid_sync_timeout_secs)).await?;
            target.exec("STOP GROUP_REPLICATION").await.ok();

            if let (Some(user), Some(host)) = (&removed_row.recovery_account_user, &removed_row.recovery_account_host) {
                let account = cluster_types::ReplicationAccount {
                    user: user.clone(),
                    host_pattern: host.clone(),
                    auth_type: cluster_types::AuthType::Password,
                };
                target.exec(&format!("DROP USER IF EXISTS {}", account.quoted_user_at_host())).await.ok();
            }
        } else if !options.force {
            return Err(ClusterError::PrimaryUnavailable(format!(
                "'{}' is unreachable; pass force to remove it anyway",
                removed_row.label
            )));
        } else {
            warn!(member = %removed_row.label, "removing unreachable member without stopping group_replication on it");
        }
    } else {
        if let Some(target) = target.as_deref_mut() {
            ChannelConfigurator::stop_and_remove(target, ManagedChannel::READ_REPLICA_CHANNEL).await.ok();
        }
    }

    if let (Some(user), Some(host)) = (&removed_row.recovery_account_user, &removed_row.recovery_account_host) {
        let account = cluster_types::ReplicationAccount {
            user: user.clone(),
            host_pattern: host.clone(),
            auth_type: cluster_types::AuthType::Password,
        };
        let snapshot = {
            let mut guard = primary.lock().await;
            AccountManager::drop_with_snapshot(&mut *guard, &account).await.ok()
        };
        if let Some(snapshot) = snapshot {
            // `Sql_undo_list::execute` replays most-recent-first, so the
            // grants are pushed in reverse to land after `CREATE USER`.
            let mut recreate = cluster_metadata::SqlUndoList::new();
            for grant in snapshot.grant_stmts.iter().rev() {
                recreate.push(grant.clone());
            }
            recreate.push(snapshot.create_user_stmt.clone());
            undo.add_sql("recreate dropped recovery account", recreate, primary.clone());
        }
    }

    let mut txn = MetadataTransaction::new();
    {
        let mut guard = primary.lock().await;
        let mut store = MetadataStore::new(&mut *guard);
        store.remove_instance(&mut txn, removed_row).await?;
    }
    let metadata_undo = txn.commit();
    if !metadata_undo.is_empty() {
        undo.add_sql("restore metadata row for removed member", metadata_undo, primary.clone());
    }

    if removed_row.role == InstanceRole::Ha {
        let remaining_addresses: Vec<Endpoint> = view
            .members
            .iter()
            .filter(|m| m.instance.instance_id != removed_row.instance_id)
            .filter_map(|m| m.instance.gr_local_address.clone())
            .collect();

        for other in others.iter_mut() {
            let Some(other_addr) = view
                .members
                .iter()
                .find(|m| m.instance.server_uuid == other.server_uuid)
                .and_then(|m| m.instance.gr_local_address.clone())
            else {
                continue;
            };
            let seeds = pure::compute_group_seeds(&remaining_addresses, &other_addr);
            let mut cfg = Config::new(true);
            cfg.push(SysvarChange::new("group_replication_group_seeds", seeds, SetMode::Persist));
            if let Err(err) = cfg.apply(other).await {
                warn!(member = %other.label(), %err, "failed to update group seeds after removal (best-effort)");
            }
        }

        let member_count = remaining_addresses.len().max(1);
        for other in others.iter_mut() {
            let (increment, offset) = pure::auto_increment_values(cluster.topology_mode, member_count, other.server_id);
            let mut cfg = Config::new(true);
            cfg.push(SysvarChange::new("auto_increment_increment", increment.to_string(), SetMode::Persist));
            cfg.push(SysvarChange::new("auto_increment_offset", offset.to_string(), SetMode::Persist));
            if let Err(err) = cfg.apply(other).await {
                warn!(member = %other.label(), %err, "failed to update auto_increment after removal (best-effort)");
            }
        }

        // spec §4.3 / §8 scenario 6: Read-Replicas with a CUSTOM source list
        // referencing the removed endpoint must have it stripped, and their
        // channel stopped entirely if that empties the list.
        reconcile_read_replica_sources(&primary, read_replicas, &removed_row.endpoint, view).await?;
    }

    info!(label = %removed_row.label, "instance removed");
    Ok(())
}

/// spec §4.3 "update read-replica sources that referenced the removed
/// endpoint": rewrites each Read-Replica's CUSTOM source list to drop
/// `removed_endpoint`, reconfiguring its channel with a rotated account
/// password, or stopping the channel if the list becomes empty.
async fn reconcile_read_replica_sources(
    primary: &SharedInstance,
    read_replicas: &mut [Instance],
    removed_endpoint: &Endpoint,
    view: &TopologyView,
) -> ClusterResult<()> {
    for replica in read_replicas.iter_mut() {
        let Some(row) = view
            .members
            .iter()
            .find(|m| m.instance.server_uuid == replica.server_uuid)
            .map(|m| m.instance.clone())
        else {
            continue;
        };
        if row.role != InstanceRole::ReadReplica {
            continue;
        }

        let policy_json = {
            let mut guard = primary.lock().await;
            let mut store = MetadataStore::new(&mut *guard);
            store.instance_attribute(row.instance_id, "read_replica_replication_sources").await?
        };
        let Some(policy_json) = policy_json else { continue };
        let Ok(ReplicationSourcesPolicy::Custom(list)) = serde_json::from_value::<ReplicationSourcesPolicy>(policy_json)
        else {
            continue;
        };
        if !list.iter().any(|s| &s.endpoint == removed_endpoint) {
            continue;
        }

        let new_list: Vec<_> = list.into_iter().filter(|s| &s.endpoint != removed_endpoint).collect();
        let new_policy = ReplicationSourcesPolicy::Custom(new_list.clone());

        let mut txn = MetadataTransaction::new();
        {
            let mut guard = primary.lock().await;
            let mut store = MetadataStore::new(&mut *guard);
            let value = serde_json::to_value(&new_policy)
                .map_err(|e| ClusterError::BadArg(format!("replication sources not serializable: {e}")))?;
            store.set_instance_attribute(&mut txn, row.instance_id, "read_replica_replication_sources", &value).await?;
        }
        // Bookkeeping for a best-effort reconciliation pass, not part of
        // this command's own undo chain.
        let _ = txn.commit();

        if new_list.is_empty() {
            ChannelConfigurator::stop_and_remove(replica, ManagedChannel::READ_REPLICA_CHANNEL).await.ok();
            warn!(member = %row.label, "read-replica's source list emptied by removal; channel stopped");
            continue;
        }

        let Some((user, host)) = row.recovery_account_user.as_ref().zip(row.recovery_account_host.as_ref()) else {
            continue;
        };
        let account = cluster_types::ReplicationAccount {
            user: user.clone(),
            host_pattern: host.clone(),
            auth_type: cluster_types::AuthType::Password,
        };
        // The existing channel password can't be recovered, only rotated.
        let password = AccountManager::generate_password();
        {
            let mut guard = primary.lock().await;
            AccountManager::rotate_password(&mut *guard, &account, &password).await?;
        }

        let candidates: Vec<MemberView> = view
            .members
            .iter()
            .filter(|m| m.instance.role == InstanceRole::Ha)
            .map(|m| MemberView {
                endpoint: m.instance.endpoint.clone(),
                online: m.is_online(),
                is_primary: m.is_primary,
                is_read_replica: false,
                version: replica.version,
            })
            .collect();

        if let Err(err) =
            ChannelConfigurator::setup_channel(replica, ManagedChannel::READ_REPLICA_CHANNEL, &new_policy, &candidates, &account.user, &password, 12, 3, false)
                .await
        {
            warn!(member = %row.label, %err, "failed to reconfigure read-replica channel after source removal (best-effort)");
        }
    }
    Ok(())
}

async fn sync_with_primary(primary: &SharedInstance, target: &mut Instance, timeout: Duration) -> ClusterResult<()> {
    let primary_gtids = {
        let mut guard = primary.lock().await;
        guard.get_sysvar("gtid_executed").await?
    };

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let caught_up = target
            .query_scalar(&format!(
                "SELECT WAIT_FOR_EXECUTED_GTID_SET('{primary_gtids}', {})",
                timeout.as_secs().min(5)
            ))
            .await?;

        if caught_up.as_deref() == Some("0") {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ClusterError::GtidSyncTimeout(target.label()));
        }
    }
}
