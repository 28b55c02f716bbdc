//! Stable error-kind enum for the cluster administration engine.
//!
//! Mirrors the shape of `readyset_errors::ReadySetError`: one `thiserror`
//! variant per failure class, a stable numeric code for the command-surface
//! exit status, and `#[from]` conversions for the lower-level errors that
//! bubble up through an [`Instance`](../cluster_instance) session.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the engine.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Error kinds from spec §7, in the fixed order they're evaluated where an
/// order is implied (target-kind before MD compatibility before quorum
/// before primary-availability before fence before ClusterSet status).
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid argument: {0}")]
    BadArg(String),

    #[error("metadata lookup failed: {0}")]
    MetadataMissing(String),

    #[error("metadata is inconsistent with the live topology: {0}")]
    MetadataInconsistent(String),

    #[error("the cluster has no quorum to perform the operation")]
    GroupHasNoQuorum,

    #[error("the cluster has no visible PRIMARY")]
    GroupHasNoPrimary,

    #[error("the primary member is unavailable: {0}")]
    PrimaryUnavailable(String),

    #[error("member '{0}' is not ONLINE or RECOVERING")]
    GroupMemberNotOnline(String),

    #[error("unsupported cluster type for this operation: {0}")]
    UnsupportedClusterType(String),

    #[error("unsupported async replication configuration: {0}")]
    UnsupportedAsyncConfiguration(String),

    #[error("server_uuid '{0}' is not unique across the metadata")]
    InvalidServerUuid(String),

    #[error("server_id {0} is not unique across the cluster")]
    InvalidServerId(u32),

    #[error("certificate-based authentication requires '{0}' to be set")]
    MissingCertOption(String),

    #[error("instance has errant transactions relative to the donor")]
    DataErrantTransactions,

    #[error("recovery is not possible from the selected donor: {0}")]
    DataRecoveryNotPossible(String),

    #[error("clone-based recovery failed: {0}")]
    CloneRecoveryFailed(String),

    #[error("distributed recovery failed: {0}")]
    DistributedRecoveryFailed(String),

    #[error("timed out waiting for the server to restart after clone")]
    ServerRestartTimeout,

    #[error("timed out waiting for GTID sync on '{0}'")]
    GtidSyncTimeout(String),

    #[error("replication error on channel '{0}': {1}")]
    ReplicationError(String, String),

    #[error("replication is misconfigured on '{0}'")]
    ReplicationInvalid(String),

    #[error("replication is stopped on '{0}'")]
    ReplicationOff(String),

    #[error("the replication applier on '{0}' reported an error")]
    ReplicationApplierError(String),

    #[error("invalid replication source list: {0}")]
    ReadReplicaInvalidSourceList(String),

    #[error("could not acquire lock '{lock_name}', held via primary '{contending_primary}'")]
    LockGetFailed {
        lock_name: String,
        contending_primary: String,
    },

    #[error("query against '{endpoint}' failed: {source}")]
    TargetQueryError {
        endpoint: String,
        #[source]
        source: mysql_async::Error,
    },

    #[error("could not connect to '{0}': {1}")]
    ConnectionError(String, String),

    #[error("operation was cancelled")]
    Cancelled,
}

impl ClusterError {
    /// Stable numeric code, analogous to MySQL Shell's `SHERR_DBA_*` values.
    /// Exposed so command executors can map failures to the process exit
    /// status required by spec §6.1.
    pub fn code(&self) -> u32 {
        match self {
            ClusterError::BadArg(_) => 51000,
            ClusterError::MetadataMissing(_) => 51001,
            ClusterError::MetadataInconsistent(_) => 51002,
            ClusterError::GroupHasNoQuorum => 51010,
            ClusterError::GroupHasNoPrimary => 51011,
            ClusterError::PrimaryUnavailable(_) => 51012,
            ClusterError::GroupMemberNotOnline(_) => 51013,
            ClusterError::UnsupportedClusterType(_) => 51020,
            ClusterError::UnsupportedAsyncConfiguration(_) => 51021,
            ClusterError::InvalidServerUuid(_) => 51030,
            ClusterError::InvalidServerId(_) => 51031,
            ClusterError::MissingCertOption(_) => 51040,
            ClusterError::DataErrantTransactions => 51050,
            ClusterError::DataRecoveryNotPossible(_) => 51051,
            ClusterError::CloneRecoveryFailed(_) => 51060,
            ClusterError::DistributedRecoveryFailed(_) => 51061,
            ClusterError::ServerRestartTimeout => 51062,
            ClusterError::GtidSyncTimeout(_) => 51070,
            ClusterError::ReplicationError(..) => 51080,
            ClusterError::ReplicationInvalid(_) => 51081,
            ClusterError::ReplicationOff(_) => 51082,
            ClusterError::ReplicationApplierError(_) => 51083,
            ClusterError::ReadReplicaInvalidSourceList(_) => 51090,
            ClusterError::LockGetFailed { .. } => 51100,
            ClusterError::TargetQueryError { .. } => 51110,
            ClusterError::ConnectionError(..) => 51111,
            ClusterError::Cancelled => 51999,
        }
    }

    /// Whether this failure, if raised past the join protocol's commit
    /// point (spec §4.2 step 6), should trigger the undo tracker.
    pub fn triggers_undo(&self) -> bool {
        matches!(
            self,
            ClusterError::CloneRecoveryFailed(_)
                | ClusterError::DistributedRecoveryFailed(_)
                | ClusterError::ServerRestartTimeout
                | ClusterError::TargetQueryError { .. }
                | ClusterError::ConnectionError(..)
        )
    }
}

impl From<mysql_async::Error> for ClusterError {
    fn from(source: mysql_async::Error) -> Self {
        ClusterError::TargetQueryError {
            endpoint: "<unknown>".to_string(),
            source,
        }
    }
}

impl From<tokio::time::error::Elapsed> for ClusterError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClusterError::GtidSyncTimeout("<unknown>".to_string())
    }
}

/// A caller-declared severity used by command output (spec §7:
/// "distinguishes `error`, `warning`, `note`, `info`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Note => "NOTE",
            Severity::Info => "INFO",
        };
        write!(f, "{s}")
    }
}

/// A non-fatal finding surfaced to the caller without aborting the command,
/// e.g. a best-effort seed update that skipped an unreachable member.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn note(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Note,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let samples = vec![
            ClusterError::BadArg("x".into()),
            ClusterError::GroupHasNoQuorum,
            ClusterError::GroupHasNoPrimary,
            ClusterError::DataErrantTransactions,
            ClusterError::ServerRestartTimeout,
            ClusterError::Cancelled,
        ];
        let mut codes: Vec<u32> = samples.iter().map(|e| e.code()).collect();
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before);
    }

    #[test]
    fn undo_triggering_is_limited_to_post_commit_failures() {
        assert!(!ClusterError::BadArg("x".into()).triggers_undo());
        assert!(ClusterError::ServerRestartTimeout.triggers_undo());
        assert!(ClusterError::CloneRecoveryFailed("x".into()).triggers_undo());
    }
}
