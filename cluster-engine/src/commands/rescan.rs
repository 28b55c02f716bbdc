use cluster_accounts::AccountManager;
use cluster_config::{Config, EngineConfig, SetMode, SysvarChange};
use cluster_errors::ClusterResult;
use cluster_instance::{Instance, LockMode, LockName};
use cluster_metadata::{MetadataStore, MetadataTransaction};
use cluster_topology::TopologyView;
use cluster_types::{AuthType, Cluster, Endpoint, InstanceRole, ReplicationAccount, TopologyMode};
use cluster_undo::SharedInstance;
use tracing::{info, instrument, warn};

pub struct RescanOptions {
    pub add_instances: Vec<Endpoint>,
    pub remove_instances: Vec<Endpoint>,
    pub auto_add: bool,
    pub auto_remove: bool,
    /// spec §4.10 step 4: only pushed when the caller explicitly asks.
    pub update_view_change_uuid: bool,
}

impl Default for RescanOptions {
    fn default() -> Self {
        RescanOptions {
            add_instances: Vec::new(),
            remove_instances: Vec::new(),
            auto_add: false,
            auto_remove: false,
            update_view_change_uuid: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct RescanReport {
    pub newly_discovered_instances: Vec<Endpoint>,
    pub unavailable_instances: Vec<Endpoint>,
    pub updated_instances: Vec<Endpoint>,
    pub new_topology_mode: Option<TopologyMode>,
}

/// spec §4.10: reconciles the Metadata against the live GR group. Unlike
/// `add_instance`/`remove_instance` this never runs the full join/leave
/// protocol — the members are already (or no longer) part of the live
/// group, so rescan only brings the bookkeeping in line.
///
/// `discovered` are already-connected sessions to live GR members found by
/// [`crate::live_endpoints_not_in_metadata`] that have no Metadata row at
/// all (step 1's "newlyDiscovered" set); `members` are the Metadata-known
/// instances `view` was built from, used for the sysvar reconciliation
/// passes (steps 4-6).
#[instrument(skip_all, fields(cluster = %cluster.name))]
pub async fn rescan(
    primary: SharedInstance,
    members: &mut [Instance],
    discovered: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    options: &RescanOptions,
    engine_cfg: &EngineConfig,
) -> ClusterResult<RescanReport> {
    let cluster_lock = LockName::Cluster { cluster_id: cluster.cluster_id };
    {
        let mut guard = primary.lock().await;
        guard
            .acquire_lock(&engine_cfg.lock_namespace, &cluster_lock, LockMode::Shared, engine_cfg.lock_acquire_timeout_secs)
            .await?;
    }

    let result = rescan_inner(&primary, members, discovered, cluster, view, options, engine_cfg).await;

    {
        let mut guard = primary.lock().await;
        guard.release_all_locks(&engine_cfg.lock_namespace).await;
    }

    result
}

async fn rescan_inner(
    primary: &SharedInstance,
    members: &mut [Instance],
    discovered: &mut [Instance],
    cluster: &Cluster,
    view: &TopologyView,
    options: &RescanOptions,
    engine_cfg: &EngineConfig,
) -> ClusterResult<RescanReport> {
    let mut report = RescanReport::default();

    // Step 1/2: diff Metadata against the live group, then apply per the
    // caller's add/remove flags.
    for candidate in discovered.iter_mut() {
        let wanted = options.auto_add || options.add_instances.contains(&candidate.endpoint);
        if !wanted {
            continue;
        }
        let endpoint = candidate.endpoint.clone();
        if let Err(err) = add_discovered_instance(primary, candidate, cluster, engine_cfg).await {
            warn!(%endpoint, %err, "rescan: failed to add newly discovered instance");
            continue;
        }
        report.newly_discovered_instances.push(endpoint);
    }

    let unavailable: Vec<_> = view.unavailable().cloned().collect();
    for member in &unavailable {
        let wanted = options.auto_remove || options.remove_instances.contains(&member.instance.endpoint);
        if !wanted {
            continue;
        }
        if let Err(err) = remove_unavailable_instance(primary, member).await {
            warn!(endpoint = %member.instance.endpoint, %err, "rescan: failed to remove unavailable instance");
            continue;
        }
        report.unavailable_instances.push(member.instance.endpoint.clone());
    }

    // Step 3: topology-mode mismatch vs live primary-election state.
    let primary_count = view.members.iter().filter(|m| m.is_primary).count();
    let live_mode = if primary_count > 1 { TopologyMode::MultiPrimary } else { TopologyMode::SinglePrimary };
    if live_mode != cluster.topology_mode {
        let mut guard = primary.lock().await;
        let mode_str = match live_mode {
            TopologyMode::MultiPrimary => "MULTI_PRIMARY",
            TopologyMode::SinglePrimary => "SINGLE_PRIMARY",
        };
        guard
            .exec(&format!(
                "UPDATE {}.clusters SET topology_mode = '{mode_str}' WHERE cluster_id = {}",
                MetadataStore::SCHEMA,
                cluster.cluster_id
            ))
            .await?;
        report.new_topology_mode = Some(live_mode);
        info!(?live_mode, "rescan: corrected recorded topology mode");
    }

    // Step 4: view_change_uuid, only on request and only where supported.
    if options.update_view_change_uuid {
        if let Some(expected) = &cluster.view_change_uuid {
            for member in members.iter_mut() {
                if !member.version.supports_view_change_uuid() {
                    continue;
                }
                let current = member.get_sysvar("group_replication_view_change_uuid").await.unwrap_or_default();
                if &current != expected {
                    let mut cfg = Config::new(engine_cfg.best_effort_member_updates);
                    cfg.push(SysvarChange::new("group_replication_view_change_uuid", expected.clone(), SetMode::Persist));
                    if let Err(err) = cfg.apply(member).await {
                        warn!(member = %member.label(), %err, "rescan: failed to persist view_change_uuid (needs full cluster restart to take effect)");
                    } else {
                        report.updated_instances.push(member.endpoint.clone());
                    }
                }
            }
        }
    }

    // Step 5: transaction_size_limit equal to the Metadata value.
    let expected_limit = cluster.transaction_size_limit();
    if expected_limit > 0 {
        for member in members.iter_mut() {
            let current = member
                .get_sysvar("group_replication_transaction_size_limit")
                .await
                .ok()
                .and_then(|s| s.parse::<i64>().ok());
            if current != Some(expected_limit) {
                let mut cfg = Config::new(engine_cfg.best_effort_member_updates);
                cfg.push(SysvarChange::new(
                    "group_replication_transaction_size_limit",
                    expected_limit.to_string(),
                    SetMode::Persist,
                ));
                if let Err(err) = cfg.apply(member).await {
                    warn!(member = %member.label(), %err, "rescan: failed to reconcile transaction_size_limit");
                } else if !report.updated_instances.contains(&member.endpoint) {
                    report.updated_instances.push(member.endpoint.clone());
                }
            }
        }
    }

    // Step 6: canonical recovery account names; repair or drop as needed.
    for row in &view.members {
        if row.instance.role != InstanceRole::Ha {
            continue;
        }
        if row.instance.recovery_account_is_canonical(&engine_cfg.recovery_account_prefix) {
            continue;
        }
        if let Err(err) = repair_recovery_account(primary, &row.instance, engine_cfg).await {
            warn!(endpoint = %row.instance.endpoint, %err, "rescan: failed to repair recovery account name");
            continue;
        }
        if !report.updated_instances.contains(&row.instance.endpoint) {
            report.updated_instances.push(row.instance.endpoint.clone());
        }
    }

    // Step 7: upgrade the GR communication protocol to the lowest member
    // version once every member supports something higher than what the
    // group is currently running at. Never attempted when best-effort
    // updates are disabled, since a failed UDF call here shouldn't abort
    // the rest of rescan's bookkeeping.
    if engine_cfg.best_effort_member_updates {
        if let Err(err) = upgrade_communication_protocol(primary, members).await {
            warn!(%err, "rescan: failed to upgrade group communication protocol");
        }
    }

    Ok(report)
}

async fn upgrade_communication_protocol(primary: &SharedInstance, members: &[Instance]) -> ClusterResult<()> {
    let Some(lowest) = members.iter().map(|m| m.version).min() else {
        return Ok(());
    };
    let target = format!("{}.{}.{}", lowest.major, lowest.minor, lowest.patch);

    let mut guard = primary.lock().await;
    let current = guard.query_scalar("SELECT group_replication_get_communication_protocol()").await?;
    if current.as_deref() == Some(target.as_str()) {
        return Ok(());
    }
    guard
        .query_scalar(&format!("SELECT group_replication_set_communication_protocol('{target}')"))
        .await?;
    info!(protocol = %target, "rescan: upgraded group communication protocol");
    Ok(())
}

async fn add_discovered_instance(
    primary: &SharedInstance,
    candidate: &mut Instance,
    cluster: &Cluster,
    engine_cfg: &EngineConfig,
) -> ClusterResult<()> {
    let gr_local_address_raw = candidate.get_sysvar("group_replication_local_address").await.ok();
    let gr_local_address = gr_local_address_raw.and_then(|s| s.parse::<Endpoint>().ok());

    let account_user = cluster_types::Instance::recovery_account_name(&engine_cfg.recovery_account_prefix, candidate.server_id);
    let account = ReplicationAccount {
        user: account_user.clone(),
        host_pattern: engine_cfg.default_replication_allowed_host.clone(),
        auth_type: AuthType::Password,
    };
    let password = AccountManager::generate_password();

    let instance_row = cluster_types::Instance {
        instance_id: candidate.server_id as u64,
        cluster_id: cluster.cluster_id,
        server_uuid: candidate.server_uuid.clone(),
        server_id: candidate.server_id,
        endpoint: candidate.endpoint.clone(),
        x_endpoint: None,
        gr_local_address,
        label: candidate.label(),
        role: InstanceRole::Ha,
        hidden_from_router: false,
        recovery_account_user: Some(account_user),
        recovery_account_host: Some(engine_cfg.default_replication_allowed_host.clone()),
    };

    let mut guard = primary.lock().await;
    AccountManager::create(&mut *guard, &account, &password).await.ok();

    let mut store = MetadataStore::new(&mut *guard);
    let mut txn = MetadataTransaction::new();
    store.insert_instance(&mut txn, &instance_row).await?;
    // rescan has no caller-facing undo step: its writes are reconciliation
    // against observed live state, not a protocol that can be cancelled
    // mid-flight.
    let _ = txn.commit();
    Ok(())
}

async fn remove_unavailable_instance(primary: &SharedInstance, member: &cluster_topology::MemberState) -> ClusterResult<()> {
    let mut guard = primary.lock().await;
    let mut store = MetadataStore::new(&mut *guard);
    let mut txn = MetadataTransaction::new();
    store.remove_instance(&mut txn, &member.instance).await?;
    let _ = txn.commit();
    Ok(())
}

async fn repair_recovery_account(primary: &SharedInstance, instance: &cluster_types::Instance, engine_cfg: &EngineConfig) -> ClusterResult<()> {
    let canonical_user = cluster_types::Instance::recovery_account_name(&engine_cfg.recovery_account_prefix, instance.server_id);
    let host = instance
        .recovery_account_host
        .clone()
        .unwrap_or_else(|| engine_cfg.default_replication_allowed_host.clone());

    let mut guard = primary.lock().await;

    if let (Some(old_user), Some(old_host)) = (&instance.recovery_account_user, &instance.recovery_account_host) {
        let stale = ReplicationAccount {
            user: old_user.clone(),
            host_pattern: old_host.clone(),
            auth_type: AuthType::Password,
        };
        guard.exec(&format!("DROP USER IF EXISTS {}", stale.quoted_user_at_host())).await.ok();
    }

    let canonical = ReplicationAccount {
        user: canonical_user.clone(),
        host_pattern: host.clone(),
        auth_type: AuthType::Password,
    };
    let password = AccountManager::generate_password();
    AccountManager::create(&mut *guard, &canonical, &password).await?;

    guard
        .exec(&format!(
            "UPDATE {}.instances SET recovery_account_user = '{}', recovery_account_host = '{}' WHERE instance_id = {}",
            MetadataStore::SCHEMA,
            canonical_user.replace('\'', "''"),
            host.replace('\'', "''"),
            instance.instance_id
        ))
        .await?;

    info!(endpoint = %instance.endpoint, "rescan: repaired non-canonical recovery account");
    Ok(())
}
