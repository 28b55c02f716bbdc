use cluster_accounts::AccountManager;
use cluster_channel::{ChannelConfigurator, MemberView};
use cluster_config::EngineConfig;
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{Instance, LockMode, LockName};
use cluster_metadata::{MetadataStore, MetadataTransaction};
use cluster_topology::{
    AnyTopologyManager, AsyncGlobalStatusFilter, CommandGate, InstanceKind, QuorumRequirement, TopologyManager,
    TopologyView,
};
use cluster_types::{
    Cluster, Instance as InstanceRow, InstanceRole, ManagedChannel, ReplicationAccount, ReplicationSourcesPolicy,
};
use cluster_undo::{SharedInstance, UndoTracker};
use serde_json::to_value;
use tracing::{info, instrument};

/// spec §4.7/§8 scenario 6 `addReplicaInstance`: provisions a Read-Replica and
/// configures its managed channel, optionally with a weighted CUSTOM source
/// list rather than following the cluster PRIMARY.
pub struct AddReplicaOptions {
    pub replication_sources: ReplicationSourcesPolicy,
    pub retry_count: u32,
    pub connect_retry_seconds: u32,
}

#[instrument(skip_all, fields(target = %target.label()))]
pub async fn add_replica_instance(
    primary: SharedInstance,
    target: &mut Instance,
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    options: &AddReplicaOptions,
    engine_cfg: &EngineConfig,
    undo: &mut UndoTracker,
) -> ClusterResult<InstanceRow> {
    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    let instance_lock = LockName::Instance { instance_id: target.server_id as u64 };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Shared, engine_cfg.lock_acquire_timeout_secs)
            .await?;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &instance_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = add_replica_inner(primary.clone(), target, cluster, view, manager, options, engine_cfg, undo).await;

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn add_replica_inner(
    primary: SharedInstance,
    target: &mut Instance,
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    options: &AddReplicaOptions,
    engine_cfg: &EngineConfig,
    undo: &mut UndoTracker,
) -> ClusterResult<InstanceRow> {
    CommandGate {
        required_kind: InstanceKind::InnoDbCluster,
        required_quorum: QuorumRequirement::Normal,
        primary_required: false,
        allowed_on_fence: false,
        clusterset_filter: AsyncGlobalStatusFilter::Any,
    }
    .evaluate(view, InstanceKind::InnoDbCluster, cluster.is_fenced())?;
    manager.validate_add(view)?;

    {
        let mut guard = primary.lock().await;
        let mut store = MetadataStore::new(&mut *guard);
        if store.server_uuid_exists(&target.server_uuid).await? {
            return Err(ClusterError::InvalidServerUuid(target.server_uuid.clone()));
        }
        if store.server_id_exists(cluster.cluster_id, target.server_id).await? {
            return Err(ClusterError::InvalidServerId(target.server_id));
        }
    }

    // spec §4.7.3: candidate sources are the cluster's own HA members, as
    // seen by this view — a Read-Replica can never source from another
    // Read-Replica.
    let candidates: Vec<MemberView> = view
        .members
        .iter()
        .filter(|m| m.instance.role == InstanceRole::Ha)
        .map(|m| MemberView {
            endpoint: m.instance.endpoint.clone(),
            online: m.is_online(),
            is_primary: m.is_primary,
            is_read_replica: false,
            version: target.version,
        })
        .collect();

    ChannelConfigurator::validate_replication_sources(&target.endpoint, target.version, &candidates)?;
    if let ReplicationSourcesPolicy::Custom(list) = &options.replication_sources {
        if list.is_empty() {
            return Err(ClusterError::ReadReplicaInvalidSourceList(
                "custom source list is empty".to_string(),
            ));
        }
        for source in list {
            if !candidates.iter().any(|c| c.endpoint == source.endpoint) {
                return Err(ClusterError::ReadReplicaInvalidSourceList(format!(
                    "'{}' is not an HA member of this cluster",
                    source.endpoint
                )));
            }
        }
    }

    // spec §4.6: channel accounts are named `<prefix><uuid-suffix>`.
    let account = ReplicationAccount::for_channel(
        &engine_cfg.channel_account_prefix,
        &target.server_uuid,
        &engine_cfg.default_replication_allowed_host,
    );
    let password = AccountManager::generate_password();
    {
        let mut guard = primary.lock().await;
        AccountManager::create(&mut *guard, &account, &password).await?;
    }
    let mut drop_account = cluster_metadata::SqlUndoList::new();
    drop_account.push(format!("DROP USER IF EXISTS {}", account.quoted_user_at_host()));
    undo.add_sql("drop replication account for new read-replica", drop_account, primary.clone());

    let new_row = InstanceRow {
        instance_id: target.server_id as u64,
        cluster_id: cluster.cluster_id,
        server_uuid: target.server_uuid.clone(),
        server_id: target.server_id,
        endpoint: target.endpoint.clone(),
        x_endpoint: None,
        gr_local_address: None,
        label: target.label(),
        role: InstanceRole::ReadReplica,
        hidden_from_router: false,
        recovery_account_user: Some(account.user.clone()),
        recovery_account_host: Some(account.host_pattern.clone()),
    };

    let mut txn = MetadataTransaction::new();
    {
        let mut guard = primary.lock().await;
        let mut store = MetadataStore::new(&mut *guard);
        store.insert_instance(&mut txn, &new_row).await?;
        let sources_json = to_value(&options.replication_sources)
            .map_err(|e| ClusterError::BadArg(format!("replication sources not serializable: {e}")))?;
        store
            .set_instance_attribute(&mut txn, new_row.instance_id, "read_replica_replication_sources", &sources_json)
            .await?;
    }
    let metadata_undo = txn.commit();
    if !metadata_undo.is_empty() {
        undo.add_sql("delete metadata row for new read-replica", metadata_undo, primary.clone());
    }

    ChannelConfigurator::setup_channel(
        target,
        ManagedChannel::READ_REPLICA_CHANNEL,
        &options.replication_sources,
        &candidates,
        &account.user,
        &password,
        options.retry_count,
        options.connect_retry_seconds,
        false,
    )
    .await?;

    info!(uuid = %new_row.server_uuid, "read-replica instance added");
    Ok(new_row)
}

#[cfg(test)]
mod tests {
    // Source-list validation is exercised through
    // `cluster_channel::ChannelConfigurator`'s own tests; this module is
    // otherwise I/O glue (see module docs).
}
