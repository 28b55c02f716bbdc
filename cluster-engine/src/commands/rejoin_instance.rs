use std::time::Duration;

use cluster_accounts::AccountManager;
use cluster_channel::{ChannelConfigurator, MemberView};
use cluster_config::{Config, EngineConfig, SetMode, SysvarChange};
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{Instance, LockMode, LockName};
use cluster_topology::{AnyTopologyManager, TopologyManager, TopologyView};
use cluster_types::{AuthType, Cluster, Endpoint, InstanceRole, ManagedChannel, ReplicationAccount, ReplicationSourcesPolicy};
use cluster_undo::SharedInstance;
use tracing::{info, instrument, warn};

use crate::pure;

pub struct RejoinInstanceOptions {
    pub ssl_mode: String,
    pub exit_state_action: String,
    pub member_weight: u8,
    pub autorejoin_tries: u32,
    pub consistency: String,
    pub expel_timeout_secs: u32,
}

/// spec §4.3 `rejoin_instance`: detects whether the target is an HA member
/// or a Read-Replica and brings it back into the topology without running
/// the full join/recovery protocol — the target already has Metadata and
/// account state, it's just disconnected from the group/channel.
#[instrument(skip_all, fields(target = %target_endpoint))]
pub async fn rejoin_instance(
    primary: SharedInstance,
    target: &mut Instance,
    target_endpoint: &Endpoint,
    others: &[Instance],
    cluster: &Cluster,
    view: &TopologyView,
    manager: &AnyTopologyManager,
    options: &RejoinInstanceOptions,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    manager.validate_rejoin(view)?;

    let row = view
        .member_by_endpoint(target_endpoint)
        .map(|m| m.instance.clone())
        .ok_or_else(|| ClusterError::MetadataMissing(format!("instance '{target_endpoint}' not in this cluster")))?;

    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    let instance_lock = LockName::Instance { instance_id: row.instance_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Shared, engine_cfg.lock_acquire_timeout_secs)
            .await?;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &instance_lock, LockMode::Exclusive, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = if row.role == InstanceRole::Ha {
        rejoin_ha(&primary, target, &row, others, cluster, view, options, engine_cfg).await
    } else {
        rejoin_read_replica(&primary, target, &row, others, view, engine_cfg).await
    };

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn rejoin_ha(
    primary: &SharedInstance,
    target: &mut Instance,
    row: &cluster_types::Instance,
    others: &[Instance],
    cluster: &Cluster,
    view: &TopologyView,
    options: &RejoinInstanceOptions,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    let group_name = cluster.group_name.clone();
    let local_address = row
        .gr_local_address
        .clone()
        .ok_or_else(|| ClusterError::BadArg(format!("'{}' has no recorded group_replication_local_address", row.label)))?;

    let all_addresses: Vec<Endpoint> = view.members.iter().filter_map(|m| m.instance.gr_local_address.clone()).collect();
    let group_seeds = pure::compute_group_seeds(&all_addresses, &local_address);

    // `target` is a live, reachable server we are about to issue
    // `START GROUP_REPLICATION` against directly, so these sysvars must take
    // effect in the running session, not just be staged for the next
    // restart (mirrors `add_instance.rs`'s own live-target gate).
    let persist_only = false;
    let params = pure::GrSysvarParams {
        group_name: &group_name,
        local_address: &local_address,
        group_seeds: &group_seeds,
        ssl_mode: &options.ssl_mode,
        exit_state_action: &options.exit_state_action,
        member_weight: options.member_weight,
        autorejoin_tries: options.autorejoin_tries,
        consistency: &options.consistency,
        expel_timeout_secs: options.expel_timeout_secs,
        comm_stack: match cluster.comm_stack {
            cluster_types::CommStack::Mysql => "MYSQL",
            cluster_types::CommStack::Xcom => "XCOM",
        },
        persist_only,
    };
    let mut sysvars = pure::build_gr_sysvars(&params);

    // Reset recovery channel credentials: a rejoin always gets a fresh
    // password rather than trusting whatever is still configured locally.
    if let (Some(user), Some(host)) = (&row.recovery_account_user, &row.recovery_account_host) {
        let account = ReplicationAccount {
            user: user.clone(),
            host_pattern: host.clone(),
            auth_type: AuthType::Password,
        };
        let password = AccountManager::generate_password();
        {
            let mut guard = primary.lock().await;
            AccountManager::rotate_password(&mut *guard, &account, &password).await?;
        }
        target
            .exec(&format!(
                "CHANGE REPLICATION SOURCE TO SOURCE_USER='{}', SOURCE_PASSWORD='{}' FOR CHANNEL 'group_replication_recovery'",
                account.user,
                password.replace('\'', "''"),
            ))
            .await?;
    }

    let mut cfg = Config::new(false);
    cfg.extend(std::mem::take(&mut sysvars));
    cfg.apply(target).await?;

    target.exec("START GROUP_REPLICATION").await?;
    wait_for_rejoin_online(target, Duration::from_secs(engine_cfg.gr_state_timeout_secs)).await?;

    let member_count = others.len() + 1;
    if pure::needs_auto_increment_update(cluster.topology_mode, member_count) {
        let (increment, offset) = pure::auto_increment_values(cluster.topology_mode, member_count, target.server_id);
        let mut cfg = Config::new(true);
        cfg.push(SysvarChange::new("auto_increment_increment", increment.to_string(), SetMode::Persist));
        cfg.push(SysvarChange::new("auto_increment_offset", offset.to_string(), SetMode::Persist));
        if let Err(err) = cfg.apply(target).await {
            warn!(member = %target.label(), %err, "failed to reapply auto_increment settings on rejoin (best-effort)");
        }
    }

    info!(label = %row.label, "instance rejoined");
    Ok(())
}

async fn rejoin_read_replica(
    primary: &SharedInstance,
    target: &mut Instance,
    row: &cluster_types::Instance,
    others: &[Instance],
    view: &TopologyView,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    ChannelConfigurator::stop_and_remove(target, ManagedChannel::READ_REPLICA_CHANNEL).await.ok();

    let candidates: Vec<MemberView> = view
        .members
        .iter()
        .filter(|m| m.instance.instance_id != row.instance_id)
        .filter_map(|m| {
            others
                .iter()
                .find(|o| o.server_uuid == m.instance.server_uuid)
                .map(|o| MemberView {
                    endpoint: m.instance.endpoint.clone(),
                    online: m.is_online(),
                    is_primary: m.is_primary,
                    is_read_replica: m.instance.role == InstanceRole::ReadReplica,
                    version: o.version,
                })
        })
        .collect();

    ChannelConfigurator::validate_replication_sources(&row.endpoint, target.version, &candidates)?;

    let (account_user, account_host) = (
        row.recovery_account_user.clone().unwrap_or_else(|| format!("{}{}", engine_cfg.channel_account_prefix, row.server_id)),
        row.recovery_account_host.clone().unwrap_or_else(|| engine_cfg.default_replication_allowed_host.clone()),
    );
    let account = ReplicationAccount {
        user: account_user.clone(),
        host_pattern: account_host,
        auth_type: AuthType::Password,
    };
    let password = AccountManager::generate_password();
    // The account usually already exists from when the replica was first
    // added; `CREATE USER IF NOT EXISTS` would then silently keep the old
    // password while we go on to configure the channel with the new one.
    // Create it fresh if missing, otherwise rotate it, so the password we
    // hand to `setup_channel` below is always the one actually in effect.
    {
        let mut guard = primary.lock().await;
        if AccountManager::create(&mut *guard, &account, &password).await.is_err() {
            AccountManager::rotate_password(&mut *guard, &account, &password).await?;
        }
    }

    ChannelConfigurator::setup_channel(
        target,
        ManagedChannel::READ_REPLICA_CHANNEL,
        &ReplicationSourcesPolicy::Primary,
        &candidates,
        &account_user,
        &password,
        12,
        3,
        false,
    )
    .await?;

    info!(label = %row.label, "read-replica rejoined");
    Ok(())
}

async fn wait_for_rejoin_online(target: &mut Instance, timeout: Duration) -> ClusterResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = target
            .query_scalar(
                "SELECT member_state FROM performance_schema.replication_group_members WHERE member_id = @@server_uuid",
            )
            .await?;
        match state.as_deref() {
            Some("ONLINE") => return Ok(()),
            Some("ERROR") => return Err(ClusterError::GroupMemberNotOnline(target.label())),
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ClusterError::ServerRestartTimeout);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
