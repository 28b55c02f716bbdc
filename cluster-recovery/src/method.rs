use cluster_errors::{ClusterError, ClusterResult};

use crate::gtid::{compare_gtid_sets, GtidSet, ReplicaGtidState};

/// User-selected (or AUTO) recovery method (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMethod {
    Auto,
    Incremental,
    Clone,
}

/// Inputs to the recovery-method decision (spec §4.4).
#[derive(Debug, Clone)]
pub struct RecoveryInput {
    pub requested: RecoveryMethod,
    pub target_gtid_executed: GtidSet,
    pub donor_gtid_executed: GtidSet,
    pub donor_gtid_purged: GtidSet,
    pub gtid_set_is_complete: bool,
    pub clone_plugin_available: bool,
}

/// Runs the spec §4.4 decision tree and returns the method actually chosen.
pub fn decide_recovery_method(input: &RecoveryInput) -> ClusterResult<RecoveryMethod> {
    let state = compare_gtid_sets(
        &input.target_gtid_executed,
        &input.donor_gtid_executed,
        &input.donor_gtid_purged,
    );

    if input.requested == RecoveryMethod::Incremental {
        if matches!(state, ReplicaGtidState::Irrecoverable | ReplicaGtidState::Diverged) {
            return Err(ClusterError::DataRecoveryNotPossible(
                "incremental recovery requires a recoverable GTID set".to_string(),
            ));
        }
        return Ok(RecoveryMethod::Incremental);
    }

    if input.requested == RecoveryMethod::Clone {
        if !input.clone_plugin_available {
            return Err(ClusterError::CloneRecoveryFailed(
                "the clone plugin is not available on the target".to_string(),
            ));
        }
        return Ok(RecoveryMethod::Clone);
    }

    // AUTO (spec §4.4 step 4).
    match state {
        ReplicaGtidState::Recoverable | ReplicaGtidState::Identical => {
            if input.gtid_set_is_complete {
                Ok(RecoveryMethod::Incremental)
            } else if input.clone_plugin_available {
                Ok(RecoveryMethod::Clone)
            } else {
                Err(ClusterError::DataRecoveryNotPossible(
                    "GTID set is not marked complete and clone is unavailable".to_string(),
                ))
            }
        }
        ReplicaGtidState::Irrecoverable => {
            if input.clone_plugin_available {
                Ok(RecoveryMethod::Clone)
            } else {
                Err(ClusterError::DataRecoveryNotPossible(
                    "GTID set is irrecoverable and clone is unavailable".to_string(),
                ))
            }
        }
        ReplicaGtidState::Diverged => Err(ClusterError::DataErrantTransactions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> RecoveryInput {
        RecoveryInput {
            requested: RecoveryMethod::Auto,
            target_gtid_executed: GtidSet::parse("uuid1:1-5").unwrap(),
            donor_gtid_executed: GtidSet::parse("uuid1:1-10").unwrap(),
            donor_gtid_purged: GtidSet::empty(),
            gtid_set_is_complete: true,
            clone_plugin_available: true,
        }
    }

    #[test]
    fn recoverable_and_complete_picks_incremental() {
        let input = base_input();
        assert_eq!(decide_recovery_method(&input).unwrap(), RecoveryMethod::Incremental);
    }

    #[test]
    fn recoverable_but_incomplete_picks_clone() {
        let mut input = base_input();
        input.gtid_set_is_complete = false;
        assert_eq!(decide_recovery_method(&input).unwrap(), RecoveryMethod::Clone);
    }

    #[test]
    fn irrecoverable_without_clone_fails() {
        let mut input = base_input();
        input.donor_gtid_purged = GtidSet::parse("uuid1:1-6").unwrap();
        input.clone_plugin_available = false;
        assert!(decide_recovery_method(&input).is_err());
    }

    #[test]
    fn diverged_always_fails() {
        let mut input = base_input();
        input.target_gtid_executed = GtidSet::parse("uuid2:1-1").unwrap();
        let err = decide_recovery_method(&input).unwrap_err();
        assert!(matches!(err, ClusterError::DataErrantTransactions));
    }

    #[test]
    fn requested_incremental_rejects_diverged_state() {
        let mut input = base_input();
        input.requested = RecoveryMethod::Incremental;
        input.target_gtid_executed = GtidSet::parse("uuid2:1-1").unwrap();
        assert!(decide_recovery_method(&input).is_err());
    }

    #[test]
    fn requested_clone_requires_plugin() {
        let mut input = base_input();
        input.requested = RecoveryMethod::Clone;
        input.clone_plugin_available = false;
        assert!(decide_recovery_method(&input).is_err());
    }
}
