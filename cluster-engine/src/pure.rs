//! Deterministic decision logic factored out of the command executors so it
//! can be tested without a live MySQL session (the executors in
//! `commands/` are themselves thin glue over this module plus the lower
//! crates' I/O).

use cluster_config::SetMode;
use cluster_recovery::GtidSet;
use cluster_types::{Endpoint, TopologyMode};

/// spec §4.2 step 4: "Resolve GR local address (host from `report_host`,
/// port from configuration or auto-allocated above the client port)".
pub fn resolve_gr_local_address(report_host: &str, configured_port: Option<u16>, client_port: u16) -> Endpoint {
    let port = configured_port.unwrap_or_else(|| client_port.saturating_add(10000));
    Endpoint::new(report_host, port)
}

/// spec §4.2 step 11 / §4.3: the group-seeds list for a member is every
/// *other* live member's GR local address (testable property 2).
pub fn compute_group_seeds(all_local_addresses: &[Endpoint], exclude: &Endpoint) -> String {
    all_local_addresses
        .iter()
        .filter(|addr| *addr != exclude)
        .map(Endpoint::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// spec §4.2 step 12 / §8 boundary behavior: auto_increment needs
/// reconfiguring once the cluster is MULTI_PRIMARY or crosses 7 members.
pub fn needs_auto_increment_update(mode: TopologyMode, member_count: usize) -> bool {
    matches!(mode, TopologyMode::MultiPrimary) || member_count >= 7
}

/// The `(auto_increment_increment, auto_increment_offset)` pair GR expects
/// once multi-writer auto-increment collision avoidance is needed; singleton
/// SINGLE_PRIMARY clusters below the threshold use MySQL's defaults.
pub fn auto_increment_values(mode: TopologyMode, member_count: usize, server_id: u32) -> (u32, u32) {
    if needs_auto_increment_update(mode, member_count) {
        let increment = 7;
        let offset = 1 + (server_id % increment);
        (increment, offset)
    } else {
        (1, 1)
    }
}

/// spec §4.2 step 8: the fixed set of GR sysvars configured on a joining
/// target, excluding recovery credentials (pushed separately via `CHANGE
/// REPLICATION SOURCE ... FOR CHANNEL 'group_replication_recovery'`) and
/// `group_replication_bootstrap_group` (bootstrap-only, spec §6.5).
pub struct GrSysvarParams<'a> {
    pub group_name: &'a str,
    pub local_address: &'a Endpoint,
    pub group_seeds: &'a str,
    pub ssl_mode: &'a str,
    pub exit_state_action: &'a str,
    pub member_weight: u8,
    pub autorejoin_tries: u32,
    pub consistency: &'a str,
    pub expel_timeout_secs: u32,
    pub comm_stack: &'a str,
    pub persist_only: bool,
}

pub fn build_gr_sysvars(params: &GrSysvarParams<'_>) -> Vec<cluster_config::SysvarChange> {
    let mode = if params.persist_only { SetMode::PersistOnly } else { SetMode::Persist };
    vec![
        cluster_config::SysvarChange::new("group_replication_group_name", params.group_name, mode),
        cluster_config::SysvarChange::new("group_replication_local_address", params.local_address.to_string(), mode),
        cluster_config::SysvarChange::new("group_replication_group_seeds", params.group_seeds, mode),
        cluster_config::SysvarChange::new("group_replication_ssl_mode", params.ssl_mode, mode),
        cluster_config::SysvarChange::new("group_replication_exit_state_action", params.exit_state_action, mode),
        cluster_config::SysvarChange::new("group_replication_member_weight", params.member_weight.to_string(), mode),
        cluster_config::SysvarChange::new("group_replication_autorejoin_tries", params.autorejoin_tries.to_string(), mode),
        cluster_config::SysvarChange::new("group_replication_consistency", params.consistency, mode),
        cluster_config::SysvarChange::new("group_replication_member_expel_timeout", params.expel_timeout_secs.to_string(), mode),
        cluster_config::SysvarChange::new("group_replication_communication_stack", params.comm_stack, mode),
        cluster_config::SysvarChange::new("skip_replica_start", "1", SetMode::PersistOnly),
    ]
}

/// spec §4.4 step 5: clears a target's executed GTID set before a clone
/// pulls a fresh one, using the modern statement on 8.4+ and the legacy one
/// otherwise.
pub fn reset_binary_logs_and_gtids_statement(version: cluster_instance::ServerVersion) -> &'static str {
    if version.at_least(8, 4, 0) {
        "RESET BINARY LOGS AND GTIDS"
    } else {
        "RESET MASTER"
    }
}

/// spec §4.3 ClusterSet failover `filter_primary_candidates`: picks the
/// candidate cluster whose `GTID_EXECUTED` is a superset of every other
/// candidate's. Returns `None` if no single candidate dominates all others
/// (an ambiguous failover, left to the caller to refuse).
pub fn pick_failover_candidate(candidates: &[(u64, GtidSet)]) -> Option<u64> {
    candidates
        .iter()
        .find(|(_, gtids)| candidates.iter().all(|(_, other)| other.is_subset_of(gtids)))
        .map(|(cluster_id, _)| *cluster_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_seeds_excludes_self() {
        let a = Endpoint::new("h1", 33061);
        let b = Endpoint::new("h2", 33061);
        let c = Endpoint::new("h3", 33061);
        let seeds = compute_group_seeds(&[a.clone(), b.clone(), c.clone()], &a);
        assert_eq!(seeds, "h2:33061,h3:33061");
    }

    #[test]
    fn auto_increment_untouched_below_threshold_single_primary() {
        assert!(!needs_auto_increment_update(TopologyMode::SinglePrimary, 3));
        assert_eq!(auto_increment_values(TopologyMode::SinglePrimary, 3, 101), (1, 1));
    }

    #[test]
    fn auto_increment_kicks_in_at_seven_members() {
        assert!(needs_auto_increment_update(TopologyMode::SinglePrimary, 7));
        let (incr, offset) = auto_increment_values(TopologyMode::SinglePrimary, 7, 3);
        assert_eq!(incr, 7);
        assert_eq!(offset, 1 + 3 % 7);
    }

    #[test]
    fn multi_primary_always_needs_auto_increment() {
        assert!(needs_auto_increment_update(TopologyMode::MultiPrimary, 2));
    }

    #[test]
    fn gr_local_address_falls_back_above_client_port() {
        let ep = resolve_gr_local_address("10.0.0.5", None, 3306);
        assert_eq!(ep, Endpoint::new("10.0.0.5", 13306));
    }

    #[test]
    fn gr_local_address_honors_configured_port() {
        let ep = resolve_gr_local_address("10.0.0.5", Some(33061), 3306);
        assert_eq!(ep, Endpoint::new("10.0.0.5", 33061));
    }

    #[test]
    fn reset_statement_depends_on_version() {
        let modern = cluster_instance::ServerVersion { major: 8, minor: 4, patch: 0 };
        let legacy = cluster_instance::ServerVersion { major: 8, minor: 0, patch: 34 };
        assert_eq!(reset_binary_logs_and_gtids_statement(modern), "RESET BINARY LOGS AND GTIDS");
        assert_eq!(reset_binary_logs_and_gtids_statement(legacy), "RESET MASTER");
    }

    #[test]
    fn failover_candidate_is_the_one_that_dominates_all_others() {
        let ahead = GtidSet::parse("uuid1:1-10").unwrap();
        let behind = GtidSet::parse("uuid1:1-5").unwrap();
        let candidates = vec![(1, behind.clone()), (2, ahead)];
        assert_eq!(pick_failover_candidate(&candidates), Some(2));
    }

    #[test]
    fn failover_candidate_is_none_when_sets_diverge() {
        let a = GtidSet::parse("uuid1:1-5,uuid2:1-1").unwrap();
        let b = GtidSet::parse("uuid1:1-5,uuid3:1-1").unwrap();
        let candidates = vec![(1, a), (2, b)];
        assert_eq!(pick_failover_candidate(&candidates), None);
    }

    #[test]
    fn single_candidate_is_always_its_own_failover_winner() {
        let only = GtidSet::parse("uuid1:1-5").unwrap();
        assert_eq!(pick_failover_candidate(&[(9, only)]), Some(9));
    }
}
