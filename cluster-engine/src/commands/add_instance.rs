use std::time::Duration;

use cluster_accounts::AccountManager;
use cluster_config::{Config, EngineConfig, SetMode, SysvarChange};
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{Instance, LockMode, LockName};
use cluster_metadata::{MetadataStore, MetadataTransaction, SqlUndoList};
use cluster_recovery::{decide_recovery_method, select_donor, Donor, DonorCandidate, GtidSet, RecoveryInput};
use cluster_topology::{
    AnyTopologyManager, AsyncGlobalStatusFilter, CommandGate, InstanceKind, QuorumRequirement, TopologyManager,
    TopologyView,
};
use cluster_types::{Cluster, Instance as InstanceRow, InstanceRole, ReplicationAccount};
use cluster_undo::{SharedInstance, UndoTracker};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::pure::{self, GrSysvarParams};

/// Caller-resolved inputs to a join (the `Instance_pool` connection factory
/// and CLI option parsing are out of scope, spec §1).
pub struct AddInstanceOptions {
    pub requested_method: cluster_recovery::RecoveryMethod,
    pub donor_override: Option<String>,
    pub gr_local_port: Option<u16>,
    pub ssl_mode: String,
    pub exit_state_action: String,
    pub member_weight: u8,
    pub autorejoin_tries: u32,
    pub consistency: String,
    pub expel_timeout_secs: u32,
    pub clone_plugin_available: bool,
}

/// spec §4.2: the ordered join protocol for adding one HA member to an
/// existing Cluster. `target` must already be a connected session to the
/// joining server; `others` are connected sessions to the rest of the live
/// group, used for the best-effort seed/auto_increment updates in steps
/// 11-12.
#[instrument(skip_all, fields(target = %target.label()))]
pub async fn add_instance(
    primary: SharedInstance,
    target: &mut Instance,
    others: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    options: &AddInstanceOptions,
    engine_cfg: &EngineConfig,
    undo: &mut UndoTracker,
) -> ClusterResult<InstanceRow> {
    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    let instance_lock = LockName::Instance { instance_id: target.server_id as u64 };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &instance_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = add_instance_inner(primary.clone(), target, others, cluster, view, manager, options, engine_cfg, undo).await;

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn add_instance_inner(
    primary: SharedInstance,
    target: &mut Instance,
    others: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    options: &AddInstanceOptions,
    engine_cfg: &EngineConfig,
    undo: &mut UndoTracker,
) -> ClusterResult<InstanceRow> {
    // Step 2: preconditions.
    CommandGate {
        required_kind: InstanceKind::InnoDbCluster,
        required_quorum: QuorumRequirement::Normal,
        primary_required: true,
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

    // Step 3: decide recovery method & donor (spec §4.4).
    let donor_candidates: Vec<DonorCandidate> = view
        .members
        .iter()
        .map(|m| DonorCandidate {
            label: m.instance.label.clone(),
            is_online: m.is_online(),
            in_cluster: true,
            ipv4_resolvable: true,
            is_primary: m.is_primary,
        })
        .collect();

    let target_gtids = GtidSet::parse(&target.get_sysvar("gtid_executed").await?)?;
    let (donor_gtids, donor_purged) = {
        let mut guard = primary.lock().await;
        (
            GtidSet::parse(&guard.get_sysvar("gtid_executed").await?)?,
            GtidSet::parse(&guard.get_sysvar("gtid_purged").await?)?,
        )
    };
    let gtid_set_is_complete = cluster.assume_gtid_set_complete();

    let method = decide_recovery_method(&RecoveryInput {
        requested: options.requested_method,
        target_gtid_executed: target_gtids,
        donor_gtid_executed: donor_gtids,
        donor_gtid_purged: donor_purged,
        gtid_set_is_complete,
        clone_plugin_available: options.clone_plugin_available,
    })?;

    let donor: Donor = select_donor(&donor_candidates, options.donor_override.as_deref(), method)?;
    info!(?method, donor = %donor.label, "recovery method decided");

    // Step 4: resolve GR local address.
    let report_host = target.get_sysvar("report_host").await?;
    let client_port: u16 = target.get_sysvar("port").await?.parse().unwrap_or(3306);
    let gr_local_address = pure::resolve_gr_local_address(&report_host, options.gr_local_port, client_port);

    // Step 6: create the recovery account on the primary; undo drops it.
    let account = ReplicationAccount::for_recovery(
        &engine_cfg.recovery_account_prefix,
        target.server_id,
        &engine_cfg.default_replication_allowed_host,
    );
    let password = AccountManager::generate_password();
    {
        let mut guard = primary.lock().await;
        AccountManager::create(&mut *guard, &account, &password).await?;
    }
    let mut drop_account = SqlUndoList::new();
    drop_account.push(format!("DROP USER IF EXISTS {}", account.quoted_user_at_host()));
    undo.add_sql("drop replication account for new member", drop_account, primary.clone());

    // Step 7: install the clone plugin on donor and target if selected.
    if method == cluster_recovery::RecoveryMethod::Clone {
        {
            let mut guard = primary.lock().await;
            guard.exec("INSTALL PLUGIN clone SONAME 'mysql_clone.so'").await.ok();
        }
        target.exec("INSTALL PLUGIN clone SONAME 'mysql_clone.so'").await.ok();

        let target_gtids_now = target.get_sysvar("gtid_executed").await?;
        if !target_gtids_now.is_empty() {
            let stmt = pure::reset_binary_logs_and_gtids_statement(target.version);
            target.exec(stmt).await?;
        }
    }

    // Step 8: configure GR sysvars on the target.
    let live_addresses: Vec<cluster_types::Endpoint> =
        view.members.iter().filter_map(|m| m.instance.gr_local_address.clone()).collect();
    let seeds = pure::compute_group_seeds(&live_addresses, &gr_local_address);
    let sysvars = pure::build_gr_sysvars(&GrSysvarParams {
        group_name: &cluster.group_name,
        local_address: &gr_local_address,
        group_seeds: &seeds,
        ssl_mode: &options.ssl_mode,
        exit_state_action: &options.exit_state_action,
        member_weight: options.member_weight,
        autorejoin_tries: options.autorejoin_tries,
        consistency: &options.consistency,
        expel_timeout_secs: options.expel_timeout_secs,
        comm_stack: match cluster.comm_stack {
            cluster_types::CommStack::Xcom => "XCOM",
            cluster_types::CommStack::Mysql => "MYSQL",
        },
        persist_only: false,
    });
    let mut cfg = Config::new(false);
    cfg.extend(sysvars);
    cfg.apply(target).await?;

    target
        .exec(&format!(
            "CHANGE REPLICATION SOURCE TO SOURCE_USER='{}', SOURCE_PASSWORD='{}' FOR CHANNEL 'group_replication_recovery'",
            account.user,
            password.replace('\'', "''"),
        ))
        .await?;

    // Step 9: insert the Metadata row inside a transaction; undo reverts it.
    let new_row = InstanceRow {
        instance_id: target.server_id as u64,
        cluster_id: cluster.cluster_id,
        server_uuid: target.server_uuid.clone(),
        server_id: target.server_id,
        endpoint: target.endpoint.clone(),
        x_endpoint: None,
        gr_local_address: Some(gr_local_address.clone()),
        label: target.label(),
        role: InstanceRole::Ha,
        hidden_from_router: false,
        recovery_account_user: Some(account.user.clone()),
        recovery_account_host: Some(account.host_pattern.clone()),
    };

    let mut txn = MetadataTransaction::new();
    {
        let mut guard = primary.lock().await;
        let mut store = MetadataStore::new(&mut *guard);
        store.insert_instance(&mut txn, &new_row).await?;
    }
    let metadata_undo = txn.commit();
    if !metadata_undo.is_empty() {
        undo.add_sql("delete metadata row for new member", metadata_undo, primary.clone());
    }

    // Step 10: start GR and wait for ONLINE.
    target.exec("START GROUP_REPLICATION").await?;
    wait_for_member_online(&primary, &target.server_uuid, Duration::from_secs(engine_cfg.gr_state_timeout_secs)).await?;

    // Step 11: update group seeds on all other live members (best-effort).
    let all_addresses: Vec<cluster_types::Endpoint> =
        live_addresses.iter().cloned().chain(std::iter::once(gr_local_address.clone())).collect();

    for other in others.iter_mut() {
        let Some(other_addr) = view
            .members
            .iter()
            .find(|m| m.instance.server_uuid == other.server_uuid)
            .and_then(|m| m.instance.gr_local_address.clone())
        else {
            continue;
        };
        let other_seeds = pure::compute_group_seeds(&all_addresses, &other_addr);
        let mut cfg = Config::new(true);
        cfg.push(SysvarChange::new("group_replication_group_seeds", other_seeds, SetMode::Persist));
        if let Err(err) = cfg.apply(other).await {
            warn!(member = %other.label(), %err, "failed to update group seeds (best-effort)");
        }
    }

    // Step 12: update auto_increment if the new member count requires it.
    let member_count = view.members.len() + 1;
    if pure::needs_auto_increment_update(cluster.topology_mode, member_count) {
        for other in others.iter_mut() {
            let (increment, offset) = pure::auto_increment_values(cluster.topology_mode, member_count, other.server_id);
            let mut cfg = Config::new(true);
            cfg.push(SysvarChange::new("auto_increment_increment", increment.to_string(), SetMode::Persist));
            cfg.push(SysvarChange::new("auto_increment_offset", offset.to_string(), SetMode::Persist));
            if let Err(err) = cfg.apply(other).await {
                warn!(member = %other.label(), %err, "failed to update auto_increment (best-effort)");
            }
        }
        let (increment, offset) = pure::auto_increment_values(cluster.topology_mode, member_count, target.server_id);
        let mut cfg = Config::new(false);
        cfg.push(SysvarChange::new("auto_increment_increment", increment.to_string(), SetMode::Persist));
        cfg.push(SysvarChange::new("auto_increment_offset", offset.to_string(), SetMode::Persist));
        cfg.apply(target).await?;
    }

    // Step 13: ClusterSet async channel, if this cluster is itself a REPLICA.
    if cluster.clusterset_id.is_some() {
        info!("cluster is a ClusterSet member; the clusterset replica channel is reconfigured by its own executor");
    }

    info!(uuid = %new_row.server_uuid, "instance joined");
    Ok(new_row)
}

async fn wait_for_member_online(primary: &SharedInstance, server_uuid: &str, timeout: Duration) -> ClusterResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = {
            let mut guard = primary.lock().await;
            guard
                .query_scalar(&format!(
                    "SELECT member_state FROM performance_schema.replication_group_members WHERE member_id = '{server_uuid}'"
                ))
                .await?
        };

        match state.as_deref() {
            Some("ONLINE") => return Ok(()),
            Some("ERROR") => {
                return Err(ClusterError::DistributedRecoveryFailed(format!(
                    "member {server_uuid} entered ERROR state during recovery"
                )))
            }
            _ => {}
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(ClusterError::ServerRestartTimeout);
        }
        sleep(Duration::from_secs(2)).await;
    }
}
